//! Startup sequencing - drives the numbered startup phases

mod machine;
mod sequencer;

pub use machine::{
    Effect, MachineContext, MachineEvent, MachineState, PhaseId, ResumeTarget, StartupMachine,
    PHASE_COUNT,
};
pub use sequencer::{SequencerCommand, SequencerHandle, SequencerStatus, StartupSequencer};

use futures::future::BoxFuture;

/// Display data for one phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseDescriptor {
    pub name: String,
    pub description: String,
}

/// Runs the work of a startup phase.
///
/// The sequencer invokes [`PhaseExecutor::execute`] on entry to every phase
/// and waits for the returned future before advancing. Implementations must
/// tolerate being invoked again for the same phase after a reset.
pub trait PhaseExecutor: Send + Sync {
    fn describe(&self, phase: PhaseId) -> PhaseDescriptor;

    fn execute(&self, phase: PhaseId) -> BoxFuture<'static, anyhow::Result<()>>;

    /// One-time cleanup run on entry to the last phase
    fn theme_transition_cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Snapshot of the sequence published on every transition
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseInfo {
    /// Store phase number: -1 before start, 0-11 while running, 99 when complete
    pub phase: i32,
    pub current_phase_name: String,
    pub next_phase_name: Option<String>,
    pub description: String,
    /// `idle`, `running`, `paused`, `ready` or `error`
    pub status: String,
    /// Machine state name, e.g. `RUNNING_SEQUENCE.PHASE_3`
    pub raw_state: String,
}

impl Default for PhaseInfo {
    fn default() -> Self {
        Self {
            phase: crate::state::STARTUP_PHASE_PRE_START,
            current_phase_name: "Idle".to_string(),
            next_phase_name: None,
            description: "Awaiting startup".to_string(),
            status: "idle".to_string(),
            raw_state: MachineState::Idle.to_string(),
        }
    }
}
