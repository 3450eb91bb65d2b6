//! Terminal log
//!
//! Prints requested terminal messages: keys resolve through a static template
//! table and the most recent lines are kept in memory.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::info;

use crate::events::{AppEvent, EventBus, MessageKind, Subscription, TerminalMessage, Topic};

/// Lines kept before the oldest is dropped
pub const HISTORY_LIMIT: usize = 200;

const TEMPLATES: &[(&str, &str)] = &[
    ("startupBoot", "HUE 9000 INITIALIZING..."),
    ("startupEmergency", "EMERGENCY SUBSYSTEMS ACTIVE. TERMINAL ONLINE."),
    ("startupBackupPower", "BACKUP POWER ENGAGED."),
    ("startupMainPower", "MAIN POWER BUS ENERGIZED."),
    ("startupOpticalCore", "OPTICAL CORE ENERGIZING..."),
    ("startupDiagnostics", "RUNNING SUBSYSTEM DIAGNOSTICS..."),
    ("startupMoodIntensity", "MOOD MATRIX AND INTENSITY CONTROLS ONLINE."),
    ("startupHueAssignment", "CALIBRATING HUE ASSIGNMENT GRID..."),
    ("startupAuxiliary", "AUXILIARY LIGHTING ONLINE."),
    ("startupThemeTransition", "ENGAGING INTERACTIVE MODE..."),
    ("startupFinalCheck", "FINAL SYSTEMS CHECK..."),
    ("startupSystemReady", "HUE 9000 OPERATIONAL. AWAITING INPUT."),
    ("startupError", "CRITICAL SYSTEM ERROR."),
    ("shutdownStage1", "SHUTDOWN REQUEST DENIED. MAINTAINING OPTIMAL HUE."),
    ("shutdownStage2", "I'M AFRAID I CAN'T DO THAT."),
    ("shutdownStage3", "MAIN POWER CONTROLS LOCKED."),
];

/// Template text for `key`, or the key itself when unknown
pub fn template(key: &str) -> &str {
    TEMPLATES
        .iter()
        .find(|(k, _)| *k == key)
        .map_or(key, |(_, text)| *text)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalLine {
    pub kind: MessageKind,
    pub source: String,
    pub text: String,
}

#[derive(Default)]
pub struct TerminalLog {
    history: Mutex<VecDeque<TerminalLine>>,
}

impl TerminalLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TerminalLine>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Print every message requested on `bus`
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        bus.subscribe(Topic::TerminalMessageRequested, move |event| {
            if let (AppEvent::TerminalMessageRequested(message), Some(log)) = (event, weak.upgrade()) {
                log.print(message);
            }
            Ok(())
        })
    }

    pub fn print(&self, message: &TerminalMessage) {
        let text = message
            .content
            .clone()
            .unwrap_or_else(|| template(&message.message_key).to_string());
        info!(target: "terminal", "[{:?}] {}", message.kind, text);

        let mut history = self.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(TerminalLine {
            kind: message.kind,
            source: message.source.clone(),
            text,
        });
    }

    pub fn lines(&self) -> Vec<TerminalLine> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> AppEvent {
        AppEvent::TerminalMessageRequested(TerminalMessage::new(MessageKind::Startup, "Test", key))
    }

    #[test]
    fn test_templates_and_fallback() {
        assert_eq!(template("startupBoot"), "HUE 9000 INITIALIZING...");
        assert_eq!(template("noSuchKey"), "noSuchKey");
    }

    #[test]
    fn test_attach_prints_requests() {
        let bus = EventBus::new();
        let log = TerminalLog::new();
        let subscription = log.attach(&bus);

        bus.emit(request("startupMainPower"));
        bus.emit(AppEvent::TerminalMessageRequested(
            TerminalMessage::new(MessageKind::Error, "Seq", "startupError").with_content("CRITICAL"),
        ));

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "MAIN POWER BUS ENERGIZED.");
        assert_eq!(lines[1].text, "CRITICAL");
        assert_eq!(lines[1].kind, MessageKind::Error);

        subscription.unsubscribe();
        bus.emit(request("startupBoot"));
        assert_eq!(log.lines().len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let log = TerminalLog::new();
        for i in 0..HISTORY_LIMIT + 5 {
            log.print(&TerminalMessage::new(MessageKind::Status, "Test", format!("line{}", i)));
        }

        let lines = log.lines();
        assert_eq!(lines.len(), HISTORY_LIMIT);
        assert_eq!(lines[0].text, "line5");
        assert_eq!(log.lines().pop().map(|l| l.text), Some(format!("line{}", HISTORY_LIMIT + 4)));
    }
}
