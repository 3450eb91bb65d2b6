//! Declarative phase configuration

use std::fmt;
use std::sync::Arc;

use super::services::{Dependency, Resolved};
use crate::timeline::{Ease, Position, Props};

/// Where a directive's elements come from
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSelector {
    /// A named element group of the panel
    Named(String),
    /// Every button of a button group
    ButtonGroup(String),
    /// The single button captioned with this label
    ButtonLabel(String),
    /// Literal element ids
    Ids(Vec<String>),
    /// The panel's root dimming variables
    DimmingFactors,
}

impl TargetSelector {
    pub fn named(group: &str) -> Self {
        TargetSelector::Named(group.to_string())
    }

    pub fn button_group(group: &str) -> Self {
        TargetSelector::ButtonGroup(group.to_string())
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelector::Named(group) => write!(f, "group '{}'", group),
            TargetSelector::ButtonGroup(group) => write!(f, "button group '{}'", group),
            TargetSelector::ButtonLabel(label) => write!(f, "button '{}'", label),
            TargetSelector::Ids(ids) => write!(f, "ids {:?}", ids),
            TargetSelector::DimmingFactors => f.write_str("dimming factors"),
        }
    }
}

type CallFn = dyn Fn(&[Resolved]) -> anyhow::Result<()> + Send + Sync;

/// A named function invoked by a [`AnimationDirective::Call`]
#[derive(Clone)]
pub struct PhaseCall {
    pub name: &'static str,
    func: Arc<CallFn>,
}

impl PhaseCall {
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&[Resolved]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    pub fn invoke(&self, args: &[Resolved]) -> anyhow::Result<()> {
        (self.func)(args)
    }
}

impl fmt::Debug for PhaseCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PhaseCall").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum AnimationDirective {
    Tween {
        target: TargetSelector,
        props: Props,
        duration: f64,
        ease: Ease,
        position: Position,
        /// Offset between successive targets
        stagger: f64,
    },
    Flicker {
        target: TargetSelector,
        /// Visual state the targets end in, e.g. `is-energized`
        state: Option<String>,
        /// Explicit profile; buttons pick one from their state when absent
        profile: Option<&'static str>,
        fast: bool,
        stagger: f64,
        position: Position,
    },
    LcdPowerOn {
        target: TargetSelector,
        stagger: f64,
        position: Position,
    },
    Call {
        call: PhaseCall,
        deps: Vec<Dependency>,
        position: Position,
    },
    LensEnergize {
        position: Position,
    },
    Audio {
        sound: String,
        position: Position,
    },
}

impl AnimationDirective {
    pub fn kind(&self) -> &'static str {
        match self {
            AnimationDirective::Tween { .. } => "tween",
            AnimationDirective::Flicker { .. } => "flicker",
            AnimationDirective::LcdPowerOn { .. } => "lcdPowerOn",
            AnimationDirective::Call { .. } => "call",
            AnimationDirective::LensEnergize { .. } => "lensEnergize",
            AnimationDirective::Audio { .. } => "audio",
        }
    }
}

/// Terminal output played at the start of a phase
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalCue {
    Message { key: String },
    /// Flicker the terminal screen while printing the message
    Flicker { key: String, profile: &'static str },
}

#[derive(Debug, Clone)]
pub struct PhaseConfig {
    pub phase: u8,
    pub name: String,
    pub description: String,
    pub terminal: Option<TerminalCue>,
    /// Minimum length of the phase in seconds
    pub duration: f64,
    pub animations: Vec<AnimationDirective>,
}
