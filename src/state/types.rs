//! Value types held by the app state store

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper clamp for dial B's linear hue
pub const DIAL_B_MAX_HUE: f64 = 359.999;

/// Hue palette of the assignment grid, one entry per grid row.
/// Row 0 is the colorless sentinel.
pub const HUE_ASSIGNMENT_TABLE: [f64; 13] = [
    0.0, 15.0, 45.0, 75.0, 105.0, 135.0, 165.0, 195.0, 225.0, 255.0, 285.0, 315.0, 345.0,
];

/// Hue value that marks a target as colorless
pub const COLORLESS_HUE: f64 = HUE_ASSIGNMENT_TABLE[0];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

impl ParseValueError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Wrap a hue into [0, 360)
pub fn normalize_hue(hue: f64) -> f64 {
    let wrapped = hue.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DialId {
    /// Hue wheel, wraps
    A,
    /// Linear intensity, clamps
    B,
}

impl DialId {
    /// Apply the dial's hue invariant
    pub fn constrain_hue(self, hue: f64) -> f64 {
        match self {
            DialId::A => normalize_hue(hue),
            DialId::B => hue.clamp(0.0, DIAL_B_MAX_HUE),
        }
    }
}

impl fmt::Display for DialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialId::A => f.write_str("A"),
            DialId::B => f.write_str("B"),
        }
    }
}

/// State of one rotary dial
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DialState {
    pub hue: f64,
    /// Visual rotation accumulator, never wrapped
    pub rotation: f64,
    pub target_hue: f64,
    pub target_rotation: f64,
    pub is_dragging: bool,
}

/// Partial dial update; `None` fields keep their current value
#[derive(Debug, Clone, Copy, Default)]
pub struct DialUpdate {
    pub hue: Option<f64>,
    pub rotation: Option<f64>,
    pub target_hue: Option<f64>,
    pub target_rotation: Option<f64>,
    pub is_dragging: Option<bool>,
}

impl DialUpdate {
    pub fn hue(hue: f64) -> Self {
        Self {
            hue: Some(hue),
            ..Self::default()
        }
    }

    pub fn target_hue(target_hue: f64) -> Self {
        Self {
            target_hue: Some(target_hue),
            ..Self::default()
        }
    }
}

/// Named regions that can be assigned a hue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKey {
    Env,
    Lcd,
    Logo,
    Btn,
}

impl TargetKey {
    pub const ALL: [TargetKey; 4] = [TargetKey::Env, TargetKey::Lcd, TargetKey::Logo, TargetKey::Btn];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKey::Env => "env",
            TargetKey::Lcd => "lcd",
            TargetKey::Logo => "logo",
            TargetKey::Btn => "btn",
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetColorProperties {
    /// Hue in [0, 360)
    pub hue: f64,
    pub is_colorless: bool,
}

impl TargetColorProperties {
    pub fn from_raw_hue(raw_hue: f64) -> Self {
        let hue = normalize_hue(raw_hue);
        Self {
            hue,
            is_colorless: hue == COLORLESS_HUE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dim,
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dim => "dim",
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }
}

impl FromStr for Theme {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dim" => Ok(Theme::Dim),
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(ParseValueError::new("theme", other)),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialBInteraction {
    #[default]
    Idle,
    Dragging,
    Settling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppStatus {
    #[default]
    Loading,
    StartingUp,
    Interactive,
    Error,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Loading => "loading",
            AppStatus::StartingUp => "starting-up",
            AppStatus::Interactive => "interactive",
            AppStatus::Error => "error",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
