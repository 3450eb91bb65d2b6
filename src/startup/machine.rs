//! Startup state machine
//!
//! A flat, synchronous transition function over a closed state enum. It
//! performs no I/O: every transition returns the [`Effect`]s the sequencer
//! has to carry out (invoke a phase, run the theme cleanup, report pause,
//! readiness or failure).

use std::fmt;

/// Number of startup phases
pub const PHASE_COUNT: u8 = 12;

/// A startup phase number in `0..PHASE_COUNT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseId(u8);

impl PhaseId {
    pub const FIRST: PhaseId = PhaseId(0);
    pub const LAST: PhaseId = PhaseId(PHASE_COUNT - 1);

    pub fn new(number: u8) -> Option<Self> {
        (number < PHASE_COUNT).then_some(PhaseId(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Where the sequence goes once this phase has completed
    pub fn successor(self) -> ResumeTarget {
        match PhaseId::new(self.0 + 1) {
            Some(next) => ResumeTarget::Phase(next),
            None => ResumeTarget::SystemReady,
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PHASE_{}", self.0)
    }
}

/// Recorded destination of a paused sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeTarget {
    Phase(PhaseId),
    SystemReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MachineState {
    #[default]
    Idle,
    Running(PhaseId),
    Paused { resume: ResumeTarget },
    SystemReady,
    Error,
}

impl MachineState {
    /// Finished states that a new start restarts from the first phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, MachineState::SystemReady | MachineState::Error)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Idle => f.write_str("IDLE"),
            MachineState::Running(phase) => write!(f, "RUNNING_SEQUENCE.{}", phase),
            MachineState::Paused { .. } => f.write_str("PAUSED_AWAITING_NEXT_STEP"),
            MachineState::SystemReady => f.write_str("SYSTEM_READY"),
            MachineState::Error => f.write_str("ERROR_STATE"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineContext {
    pub step_through: bool,
    pub resume: Option<ResumeTarget>,
    pub error: Option<String>,
    pub theme_cleanup_performed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    Start { step_through: bool },
    PhaseSucceeded(PhaseId),
    PhaseFailed { phase: PhaseId, error: String },
    NextStep,
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ResetPerformed,
    ThemeTransitionCleanup,
    InvokePhase(PhaseId),
    Paused { completed: PhaseId, resume: ResumeTarget },
    Ready,
    Failed { phase: PhaseId, error: String },
}

#[derive(Debug, Default)]
pub struct StartupMachine {
    state: MachineState,
    context: MachineContext,
}

impl StartupMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    /// Apply `event`; events that do not apply to the current state are ignored
    pub fn handle(&mut self, event: MachineEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match (self.state, event) {
            (MachineState::Idle, MachineEvent::Start { step_through }) => {
                self.context.step_through = step_through;
                self.enter(PhaseId::FIRST, &mut effects);
            }
            (state, MachineEvent::Start { step_through }) if state.is_terminal() => {
                self.reset(&mut effects);
                self.context.step_through = step_through;
                self.enter(PhaseId::FIRST, &mut effects);
            }
            (MachineState::Running(current), MachineEvent::PhaseSucceeded(phase))
                if current == phase =>
            {
                let next = phase.successor();
                if self.context.step_through {
                    self.state = MachineState::Paused { resume: next };
                    self.context.resume = Some(next);
                    effects.push(Effect::Paused {
                        completed: phase,
                        resume: next,
                    });
                } else {
                    self.go_to(next, &mut effects);
                }
            }
            (MachineState::Running(current), MachineEvent::PhaseFailed { phase, error })
                if current == phase =>
            {
                self.state = MachineState::Error;
                self.context.error = Some(error.clone());
                effects.push(Effect::Failed { phase, error });
            }
            (MachineState::Paused { resume }, MachineEvent::NextStep) => {
                self.context.resume = None;
                self.go_to(resume, &mut effects);
            }
            (_, MachineEvent::Reset) => self.reset(&mut effects),
            _ => {}
        }
        effects
    }

    fn go_to(&mut self, target: ResumeTarget, effects: &mut Vec<Effect>) {
        match target {
            ResumeTarget::Phase(phase) => self.enter(phase, effects),
            ResumeTarget::SystemReady => {
                self.state = MachineState::SystemReady;
                effects.push(Effect::Ready);
            }
        }
    }

    fn enter(&mut self, phase: PhaseId, effects: &mut Vec<Effect>) {
        self.state = MachineState::Running(phase);
        if phase == PhaseId::LAST && !self.context.theme_cleanup_performed {
            self.context.theme_cleanup_performed = true;
            effects.push(Effect::ThemeTransitionCleanup);
        }
        effects.push(Effect::InvokePhase(phase));
    }

    // The stepping mode is configuration rather than run state and survives
    // a reset; everything else starts over.
    fn reset(&mut self, effects: &mut Vec<Effect>) {
        self.state = MachineState::Idle;
        self.context = MachineContext {
            step_through: self.context.step_through,
            ..MachineContext::default()
        };
        effects.push(Effect::ResetPerformed);
    }
}
