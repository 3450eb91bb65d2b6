//! Startup sequencer
//!
//! Owns the [`StartupMachine`] and carries out its effects: phase services
//! are spawned as tasks whose results come back on an internal channel, the
//! store and bus are updated on every transition, and a status stream is
//! broadcast for external steppers. External control goes through a
//! cloneable [`SequencerHandle`].

use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::{AppEvent, MessageKind, TerminalMessage};
use crate::state::{AppStateStore, AppStatus, STARTUP_PHASE_COMPLETE, STARTUP_PHASE_PRE_START};

use super::{
    Effect, MachineEvent, MachineState, PhaseExecutor, PhaseId, PhaseInfo, ResumeTarget,
    StartupMachine,
};

const MESSAGE_SOURCE: &str = "StartupSequencer";

/// Commands accepted by the sequencer
#[derive(Debug, Clone)]
pub enum SequencerCommand {
    /// Start the sequence; restarts it if it already reached a terminal state
    Start { step_through: bool },
    /// Resume a paused sequence
    NextStep,
    /// Return to idle, discarding any in-flight phase result
    Reset,
    /// Stop the sequencer task
    Shutdown,
}

/// Status updates from the sequencer
#[derive(Debug, Clone, PartialEq)]
pub enum SequencerStatus {
    Idle,
    Running(PhaseId),
    Paused {
        completed: PhaseId,
        resume: ResumeTarget,
    },
    Ready,
    Failed {
        phase: PhaseId,
        error: String,
    },
}

struct PhaseOutcome {
    /// Sequence generation the phase was started in
    generation: u64,
    phase: PhaseId,
    result: Result<()>,
}

pub struct StartupSequencer {
    machine: StartupMachine,
    executor: Arc<dyn PhaseExecutor>,
    store: Arc<AppStateStore>,
    cmd_rx: mpsc::Receiver<SequencerCommand>,
    status_tx: broadcast::Sender<SequencerStatus>,
    info: Arc<Mutex<PhaseInfo>>,
    outcome_tx: mpsc::UnboundedSender<PhaseOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<PhaseOutcome>,
    /// Bumped on reset so results of abandoned phases are dropped
    generation: u64,
    last_phase: Option<PhaseId>,
    step_controls: Option<bool>,
}

impl StartupSequencer {
    pub fn new(
        executor: Arc<dyn PhaseExecutor>,
        store: Arc<AppStateStore>,
    ) -> (Self, SequencerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (status_tx, _) = broadcast::channel(64);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let info = Arc::new(Mutex::new(PhaseInfo::default()));

        let handle = SequencerHandle {
            cmd_tx,
            status_tx: status_tx.clone(),
            info: info.clone(),
        };
        let sequencer = Self {
            machine: StartupMachine::new(),
            executor,
            store,
            cmd_rx,
            status_tx,
            info,
            outcome_tx,
            outcome_rx,
            generation: 0,
            last_phase: None,
            step_controls: None,
        };
        (sequencer, handle)
    }

    /// Process commands and phase results until shut down or every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!("Startup sequencer running");
        let _ = self.status_tx.send(SequencerStatus::Idle);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SequencerCommand::Start { step_through }) => {
                            info!("Startup requested (step-through: {})", step_through);
                            self.dispatch(MachineEvent::Start { step_through });
                        }
                        Some(SequencerCommand::NextStep) => {
                            if !matches!(self.machine.state(), MachineState::Paused { .. }) {
                                debug!("Next step ignored in {}", self.machine.state());
                            }
                            self.dispatch(MachineEvent::NextStep);
                        }
                        Some(SequencerCommand::Reset) => {
                            info!("Startup sequence reset requested");
                            self.dispatch(MachineEvent::Reset);
                        }
                        Some(SequencerCommand::Shutdown) | None => {
                            info!("Startup sequencer shutting down");
                            break;
                        }
                    }
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }
            }
        }

        Ok(())
    }

    fn handle_outcome(&mut self, outcome: PhaseOutcome) {
        if outcome.generation != self.generation {
            debug!("Dropping result of abandoned {}", outcome.phase);
            return;
        }
        let event = match outcome.result {
            Ok(()) => {
                debug!("{} completed", outcome.phase);
                MachineEvent::PhaseSucceeded(outcome.phase)
            }
            Err(e) => MachineEvent::PhaseFailed {
                phase: outcome.phase,
                error: format!("{:#}", e),
            },
        };
        self.dispatch(event);
    }

    fn dispatch(&mut self, event: MachineEvent) {
        let effects = self.machine.handle(event);
        if effects.is_empty() {
            return;
        }

        let mut statuses = Vec::new();
        for effect in effects {
            if let Some(status) = self.apply(effect) {
                statuses.push(status);
            }
        }

        let info = self.phase_info();
        *self.info.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = info.clone();
        self.store.bus().emit(AppEvent::StartupPhaseChanged(info));

        for status in statuses {
            let _ = self.status_tx.send(status);
        }
    }

    fn apply(&mut self, effect: Effect) -> Option<SequencerStatus> {
        match effect {
            Effect::ResetPerformed => {
                self.generation += 1;
                self.last_phase = None;
                self.store.set_current_startup_phase_number(STARTUP_PHASE_PRE_START);
                self.store.set_app_status(AppStatus::Loading);
                self.set_step_controls(false);
                Some(SequencerStatus::Idle)
            }
            Effect::ThemeTransitionCleanup => {
                info!("Running theme transition cleanup");
                if let Err(e) = self.executor.theme_transition_cleanup() {
                    warn!("Theme transition cleanup failed: {:#}", e);
                }
                None
            }
            Effect::InvokePhase(phase) => {
                info!("Entering {} ({})", phase, self.executor.describe(phase).name);
                self.last_phase = Some(phase);
                self.store.set_app_status(AppStatus::StartingUp);
                self.store.set_current_startup_phase_number(i32::from(phase.number()));
                self.set_step_controls(false);
                self.spawn_phase(phase);
                Some(SequencerStatus::Running(phase))
            }
            Effect::Paused { completed, resume } => {
                info!("{} complete, awaiting next step", completed);
                self.set_step_controls(true);
                Some(SequencerStatus::Paused { completed, resume })
            }
            Effect::Ready => {
                info!("Startup sequence complete, system ready");
                self.store.set_current_startup_phase_number(STARTUP_PHASE_COMPLETE);
                self.store.set_app_status(AppStatus::Interactive);
                self.set_step_controls(true);
                Some(SequencerStatus::Ready)
            }
            Effect::Failed { phase, error } => {
                error!("Startup {} failed: {}", phase, error);
                self.store.set_app_status(AppStatus::Error);
                let bus = self.store.bus();
                bus.emit(AppEvent::TerminalMessageRequested(
                    TerminalMessage::new(MessageKind::Error, MESSAGE_SOURCE, "startupError")
                        .with_content(format!("CRITICAL SYSTEM ERROR: {}", error)),
                ));
                bus.emit(AppEvent::StartupError(error.clone()));
                self.set_step_controls(true);
                Some(SequencerStatus::Failed { phase, error })
            }
        }
    }

    fn spawn_phase(&self, phase: PhaseId) {
        let work = self.executor.execute(phase);
        let tx = self.outcome_tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            let result = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("{} panicked", phase)),
            };
            let _ = tx.send(PhaseOutcome {
                generation,
                phase,
                result,
            });
        });
    }

    fn set_step_controls(&mut self, enabled: bool) {
        if self.step_controls == Some(enabled) {
            return;
        }
        self.step_controls = Some(enabled);
        self.store
            .bus()
            .emit(AppEvent::StepControlsChanged { enabled });
    }

    fn target_name(&self, target: ResumeTarget) -> String {
        match target {
            ResumeTarget::Phase(phase) => self.executor.describe(phase).name,
            ResumeTarget::SystemReady => "System Ready".to_string(),
        }
    }

    fn phase_info(&self) -> PhaseInfo {
        let state = self.machine.state();
        let raw_state = state.to_string();
        match state {
            MachineState::Idle => PhaseInfo::default(),
            MachineState::Running(phase) => {
                let descriptor = self.executor.describe(phase);
                PhaseInfo {
                    phase: i32::from(phase.number()),
                    current_phase_name: descriptor.name,
                    next_phase_name: Some(self.target_name(phase.successor())),
                    description: descriptor.description,
                    status: "running".to_string(),
                    raw_state,
                }
            }
            MachineState::Paused { resume } => {
                let next = self.target_name(resume);
                let (phase, current) = match self.last_phase {
                    Some(phase) => (
                        i32::from(phase.number()),
                        self.executor.describe(phase).name,
                    ),
                    None => (STARTUP_PHASE_PRE_START, "Idle".to_string()),
                };
                PhaseInfo {
                    phase,
                    current_phase_name: current,
                    description: format!("Paused before {}", next),
                    next_phase_name: Some(next),
                    status: "paused".to_string(),
                    raw_state,
                }
            }
            MachineState::SystemReady => PhaseInfo {
                phase: STARTUP_PHASE_COMPLETE,
                current_phase_name: "System Ready".to_string(),
                next_phase_name: None,
                description: "Startup sequence complete".to_string(),
                status: "ready".to_string(),
                raw_state,
            },
            MachineState::Error => PhaseInfo {
                phase: self.last_phase.map_or(STARTUP_PHASE_PRE_START, |p| i32::from(p.number())),
                current_phase_name: "Error".to_string(),
                next_phase_name: None,
                description: self.machine.context().error.clone().unwrap_or_default(),
                status: "error".to_string(),
                raw_state,
            },
        }
    }
}

/// Cloneable control surface for a running [`StartupSequencer`]
#[derive(Clone)]
pub struct SequencerHandle {
    cmd_tx: mpsc::Sender<SequencerCommand>,
    status_tx: broadcast::Sender<SequencerStatus>,
    info: Arc<Mutex<PhaseInfo>>,
}

impl SequencerHandle {
    pub async fn start(&self, step_through: bool) -> Result<()> {
        self.send(SequencerCommand::Start { step_through }).await
    }

    pub async fn play_next_phase(&self) -> Result<()> {
        self.send(SequencerCommand::NextStep).await
    }

    pub async fn reset_sequence(&self) -> Result<()> {
        self.send(SequencerCommand::Reset).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SequencerCommand::Shutdown).await
    }

    pub fn current_phase_info(&self) -> PhaseInfo {
        self.info
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequencerStatus> {
        self.status_tx.subscribe()
    }

    async fn send(&self, cmd: SequencerCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("startup sequencer is not running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, Topic};
    use crate::startup::PhaseDescriptor;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedExecutor {
        invoked: Mutex<Vec<u8>>,
        fail_on: Option<u8>,
        cleanups: AtomicUsize,
    }

    impl PhaseExecutor for ScriptedExecutor {
        fn describe(&self, phase: PhaseId) -> PhaseDescriptor {
            PhaseDescriptor {
                name: format!("Phase {}", phase.number()),
                description: String::new(),
            }
        }

        fn execute(&self, phase: PhaseId) -> BoxFuture<'static, Result<()>> {
            self.invoked.lock().unwrap().push(phase.number());
            let fail = self.fail_on == Some(phase.number());
            Box::pin(async move {
                tokio::task::yield_now().await;
                if fail {
                    anyhow::bail!("lens assembly not responding");
                }
                Ok(())
            })
        }

        fn theme_transition_cleanup(&self) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        executor: Arc<ScriptedExecutor>,
        store: Arc<AppStateStore>,
        handle: SequencerHandle,
        statuses: broadcast::Receiver<SequencerStatus>,
    }

    fn harness(fail_on: Option<u8>) -> Harness {
        let executor = Arc::new(ScriptedExecutor {
            fail_on,
            ..ScriptedExecutor::default()
        });
        let store = Arc::new(AppStateStore::new(EventBus::new()));
        let (sequencer, handle) = StartupSequencer::new(executor.clone(), store.clone());
        let statuses = handle.subscribe();
        tokio::spawn(sequencer.run());
        Harness {
            executor,
            store,
            handle,
            statuses,
        }
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<SequencerStatus>,
        pred: impl Fn(&SequencerStatus) -> bool,
    ) -> SequencerStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = rx.recv().await.unwrap();
                if pred(&status) {
                    return status;
                }
            }
        })
        .await
        .expect("sequencer status not reached")
    }

    #[tokio::test]
    async fn test_step_mode_pauses_after_every_phase() {
        let mut h = harness(None);
        h.handle.start(true).await.unwrap();

        let mut completed = Vec::new();
        for _ in 0..12 {
            let status = wait_for(&mut h.statuses, |s| matches!(s, SequencerStatus::Paused { .. })).await;
            if let SequencerStatus::Paused { completed: phase, .. } = status {
                completed.push(phase.number());
            }
            assert_eq!(h.handle.current_phase_info().status, "paused");
            h.handle.play_next_phase().await.unwrap();
        }
        wait_for(&mut h.statuses, |s| *s == SequencerStatus::Ready).await;

        assert_eq!(completed, (0..12).collect::<Vec<_>>());
        assert_eq!(*h.executor.invoked.lock().unwrap(), (0..12).collect::<Vec<_>>());
        assert_eq!(h.store.app_status(), AppStatus::Interactive);
        assert_eq!(h.store.current_startup_phase_number(), STARTUP_PHASE_COMPLETE);
        assert_eq!(h.handle.current_phase_info().raw_state, "SYSTEM_READY");
    }

    #[tokio::test]
    async fn test_auto_mode_runs_straight_through() {
        let mut h = harness(None);
        h.handle.start(false).await.unwrap();

        let mut seen = Vec::new();
        loop {
            let status = wait_for(&mut h.statuses, |_| true).await;
            let done = status == SequencerStatus::Ready;
            seen.push(status);
            if done {
                break;
            }
        }

        assert!(!seen.iter().any(|s| matches!(s, SequencerStatus::Paused { .. })));
        let running: Vec<u8> = seen
            .iter()
            .filter_map(|s| match s {
                SequencerStatus::Running(p) => Some(p.number()),
                _ => None,
            })
            .collect();
        assert_eq!(running, (0..12).collect::<Vec<_>>());
        assert_eq!(h.executor.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_phase_failure_reaches_error_state_in_both_modes() {
        for step_through in [false, true] {
            let mut h = harness(Some(4));
            let errors = Arc::new(Mutex::new(Vec::new()));
            let e = errors.clone();
            h.store.bus().subscribe(Topic::StartupError, move |event| {
                if let AppEvent::StartupError(message) = event {
                    e.lock().unwrap().push(message.clone());
                }
                Ok(())
            });
            let lines = Arc::new(Mutex::new(Vec::new()));
            let l = lines.clone();
            h.store.bus().subscribe(Topic::TerminalMessageRequested, move |event| {
                if let AppEvent::TerminalMessageRequested(message) = event {
                    l.lock().unwrap().push(message.clone());
                }
                Ok(())
            });

            h.handle.start(step_through).await.unwrap();
            loop {
                let status = wait_for(&mut h.statuses, |s| {
                    matches!(s, SequencerStatus::Paused { .. } | SequencerStatus::Failed { .. })
                })
                .await;
                match status {
                    SequencerStatus::Failed { phase, .. } => {
                        assert_eq!(phase.number(), 4);
                        break;
                    }
                    _ => h.handle.play_next_phase().await.unwrap(),
                }
            }

            assert_eq!(h.store.app_status(), AppStatus::Error);
            assert_eq!(*h.executor.invoked.lock().unwrap(), vec![0, 1, 2, 3, 4]);
            assert_eq!(errors.lock().unwrap().len(), 1);
            let lines = lines.lock().unwrap();
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].kind, MessageKind::Error);
            assert!(lines[0]
                .content
                .as_deref()
                .unwrap()
                .starts_with("CRITICAL SYSTEM ERROR: "));

            let info = h.handle.current_phase_info();
            assert_eq!(info.raw_state, "ERROR_STATE");
            assert_eq!(info.phase, 4);
        }
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle_and_allows_restart() {
        let mut h = harness(None);
        h.handle.start(true).await.unwrap();
        wait_for(&mut h.statuses, |s| matches!(s, SequencerStatus::Paused { .. })).await;

        h.handle.reset_sequence().await.unwrap();
        wait_for(&mut h.statuses, |s| *s == SequencerStatus::Idle).await;
        assert_eq!(h.store.current_startup_phase_number(), STARTUP_PHASE_PRE_START);
        assert_eq!(h.handle.current_phase_info(), PhaseInfo::default());

        h.handle.start(false).await.unwrap();
        wait_for(&mut h.statuses, |s| *s == SequencerStatus::Ready).await;
        let invoked = h.executor.invoked.lock().unwrap().clone();
        assert_eq!(invoked[0], 0);
        assert_eq!(&invoked[1..], (0..12).collect::<Vec<_>>().as_slice());
    }

    #[tokio::test]
    async fn test_handle_fails_after_shutdown() {
        let h = harness(None);
        h.handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.handle.start(false).await.is_err());
    }
}
