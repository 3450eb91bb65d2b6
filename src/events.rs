//! Panel event bus
//!
//! Synchronous publish/subscribe over typed topics. Listeners are called in
//! subscription order on the emitting thread. The listener list is snapshotted
//! before delivery, so subscribing or unsubscribing from inside a listener only
//! affects later emissions. A listener that fails (returns `Err` or panics) is
//! logged and skipped; the remaining listeners still run and the emitter never
//! sees the failure.

use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, trace};

use crate::startup::PhaseInfo;
use crate::state::{
    AppStatus, DialBInteraction, DialId, DialState, TargetColorProperties, TargetKey, Theme,
};

/// Kind of line requested from the terminal log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Status,
    Startup,
    Shutdown,
    Error,
}

/// A request for the terminal log to print a message
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalMessage {
    pub kind: MessageKind,
    /// Component that asked for the message
    pub source: String,
    /// Template key resolved by the terminal
    pub message_key: String,
    /// Literal content, used instead of the template when present
    pub content: Option<String>,
}

impl TerminalMessage {
    pub fn new(kind: MessageKind, source: impl Into<String>, message_key: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            message_key: message_key.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Events published on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    DialUpdated { id: DialId, state: DialState },
    TargetColorChanged { target: TargetKey, properties: TargetColorProperties },
    ThemeChanged(Theme),
    /// Lens power as a fraction in [0, 1]
    TrueLensPowerChanged(f64),
    DialBInteractionChange(DialBInteraction),
    AppStatusChanged(AppStatus),
    StartupPhaseNumberChanged(i32),
    ResistiveShutdownStageChanged(u8),
    MainPowerOffButtonDisabledChanged(bool),
    StartupPhaseChanged(PhaseInfo),
    StartupError(String),
    /// Manual stepping controls became usable (or not)
    StepControlsChanged { enabled: bool },
    TerminalMessageRequested(TerminalMessage),
}

/// Subscription key for a family of [`AppEvent`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    DialUpdated,
    TargetColorChanged,
    ThemeChanged,
    TrueLensPowerChanged,
    DialBInteractionChange,
    AppStatusChanged,
    StartupPhaseNumberChanged,
    ResistiveShutdownStageChanged,
    MainPowerOffButtonDisabledChanged,
    StartupPhaseChanged,
    StartupError,
    StepControlsChanged,
    TerminalMessageRequested,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::DialUpdated => "dialUpdated",
            Topic::TargetColorChanged => "targetColorChanged",
            Topic::ThemeChanged => "themeChanged",
            Topic::TrueLensPowerChanged => "trueLensPowerChanged",
            Topic::DialBInteractionChange => "dialBInteractionChange",
            Topic::AppStatusChanged => "appStatusChanged",
            Topic::StartupPhaseNumberChanged => "startupPhaseNumberChanged",
            Topic::ResistiveShutdownStageChanged => "resistiveShutdownStageChanged",
            Topic::MainPowerOffButtonDisabledChanged => "mainPowerOffButtonDisabledChanged",
            Topic::StartupPhaseChanged => "startup:phaseChanged",
            Topic::StartupError => "startup:error",
            Topic::StepControlsChanged => "startup:stepControlsChanged",
            Topic::TerminalMessageRequested => "requestTerminalMessage",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppEvent {
    pub fn topic(&self) -> Topic {
        match self {
            AppEvent::DialUpdated { .. } => Topic::DialUpdated,
            AppEvent::TargetColorChanged { .. } => Topic::TargetColorChanged,
            AppEvent::ThemeChanged(_) => Topic::ThemeChanged,
            AppEvent::TrueLensPowerChanged(_) => Topic::TrueLensPowerChanged,
            AppEvent::DialBInteractionChange(_) => Topic::DialBInteractionChange,
            AppEvent::AppStatusChanged(_) => Topic::AppStatusChanged,
            AppEvent::StartupPhaseNumberChanged(_) => Topic::StartupPhaseNumberChanged,
            AppEvent::ResistiveShutdownStageChanged(_) => Topic::ResistiveShutdownStageChanged,
            AppEvent::MainPowerOffButtonDisabledChanged(_) => {
                Topic::MainPowerOffButtonDisabledChanged
            }
            AppEvent::StartupPhaseChanged(_) => Topic::StartupPhaseChanged,
            AppEvent::StartupError(_) => Topic::StartupError,
            AppEvent::StepControlsChanged { .. } => Topic::StepControlsChanged,
            AppEvent::TerminalMessageRequested(_) => Topic::TerminalMessageRequested,
        }
    }
}

type Listener = Arc<dyn Fn(&AppEvent) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<Topic, Vec<(u64, Listener)>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle to the shared bus
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

/// Token returned by [`EventBus::subscribe`]
///
/// Dropping the token does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(listeners) = registry.listeners.get_mut(&self.topic) {
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for every event on `topic`
    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> Subscription
    where
        F: Fn(&AppEvent) -> Result<()> + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(topic)
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            topic,
            id,
        }
    }

    /// Deliver `event` to every listener subscribed to its topic
    pub fn emit(&self, event: AppEvent) {
        let topic = event.topic();
        let snapshot: Vec<(u64, Listener)> = {
            let registry = lock(&self.registry);
            match registry.listeners.get(&topic) {
                Some(listeners) => listeners.clone(),
                None => return,
            }
        };

        trace!("Emitting {} to {} listener(s)", topic, snapshot.len());

        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Listener {} for {} failed: {:#}", id, topic, e),
                Err(_) => error!("Listener {} for {} panicked", id, topic),
            }
        }
    }

    #[cfg(test)]
    pub fn listener_count(&self, topic: Topic) -> usize {
        lock(&self.registry)
            .listeners
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let bus = EventBus::new();
        let calls = counter();

        bus.subscribe(Topic::ThemeChanged, |_| anyhow::bail!("listener broke"));
        bus.subscribe(Topic::ThemeChanged, |_| panic!("listener panicked"));
        let c = calls.clone();
        bus.subscribe(Topic::ThemeChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(AppEvent::ThemeChanged(Theme::Dark));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_unsubscribe_during_emit() {
        let bus = EventBus::new();
        let before = counter();
        let selfish = counter();
        let after = counter();

        let c = before.clone();
        bus.subscribe(Topic::AppStatusChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in = slot.clone();
        let c = selfish.clone();
        let sub = bus.subscribe(Topic::AppStatusChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_in.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(sub);

        let c = after.clone();
        bus.subscribe(Topic::AppStatusChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(AppEvent::AppStatusChanged(AppStatus::StartingUp));
        bus.emit(AppEvent::AppStatusChanged(AppStatus::Interactive));

        assert_eq!(before.load(Ordering::SeqCst), 2);
        assert_eq!(selfish.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count(Topic::AppStatusChanged), 2);
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let calls = counter();
        let c = calls.clone();
        bus.subscribe(Topic::ThemeChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(AppEvent::StartupError("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_twice_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.subscribe(Topic::StartupError, |_| Ok(()));
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(bus.listener_count(Topic::StartupError), 0);
    }

    #[test]
    fn test_listener_can_emit_reentrantly() {
        let bus = EventBus::new();
        let calls = counter();

        let inner_bus = bus.clone();
        bus.subscribe(Topic::ThemeChanged, move |_| {
            inner_bus.emit(AppEvent::StartupError("nested".to_string()));
            Ok(())
        });
        let c = calls.clone();
        bus.subscribe(Topic::StartupError, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(AppEvent::ThemeChanged(Theme::Light));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
