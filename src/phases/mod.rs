//! Startup phases
//!
//! Each phase is a static [`PhaseConfig`]: a terminal cue, a minimum duration
//! and a list of typed [`AnimationDirective`]s. The [`PhaseRunner`] turns a
//! config into one master timeline, and [`SequenceExecutor`] exposes the
//! runner to the startup sequencer.

mod config;
mod runner;
mod sequence;
mod services;

pub use config::{AnimationDirective, PhaseCall, PhaseConfig, TargetSelector, TerminalCue};
pub use runner::{PhaseError, PhaseRunner, SequenceExecutor};
pub use sequence::startup_phases;
pub use services::{Dependency, PanelSettings, ResolveError, Resolved, Services};
