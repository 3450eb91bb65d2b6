//! Placement of a child within a timeline

/// Where a child starts, relative to the timeline being built
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Position {
    /// At the current end of the timeline
    #[default]
    End,
    /// Absolute seconds from the timeline start
    At(f64),
    /// Offset from the current end of the timeline
    Relative(f64),
    /// Offset from the end of the most recently added child
    AfterPrevious(f64),
    /// Offset from the start of the most recently added child
    WithPrevious(f64),
}

impl Position {
    /// Right after the most recently added child
    pub fn after_previous() -> Self {
        Position::AfterPrevious(0.0)
    }
}

impl From<f64> for Position {
    fn from(seconds: f64) -> Self {
        Position::At(seconds)
    }
}
