//! Animatable targets

use std::fmt;
use std::sync::Arc;

/// An animatable property of an element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Property {
    Opacity,
    /// A custom variable such as `--glow-opacity`
    Var(String),
}

impl Property {
    pub fn var(name: impl Into<String>) -> Self {
        Property::Var(name.into())
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Opacity => f.write_str("opacity"),
            Property::Var(name) => f.write_str(name),
        }
    }
}

/// A visual element the scheduler can read and write.
///
/// Implementations use interior mutability; the scheduler only holds shared
/// handles.
pub trait Element: Send + Sync {
    fn id(&self) -> &str;

    /// Button caption, if the element is a button
    fn label(&self) -> Option<&str> {
        None
    }

    /// Current value, `None` when the property was never written
    fn get(&self, property: &Property) -> Option<f64>;

    fn set(&self, property: &Property, value: f64);

    /// Visual state classes, e.g. `"is-energized is-selected"`
    fn state(&self) -> String {
        String::new()
    }

    fn set_state(&self, _state: &str) {}
}

pub type ElementHandle = Arc<dyn Element>;

/// Property values for a tween or set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props(Vec<(Property, f64)>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opacity(self, value: f64) -> Self {
        self.with(Property::Opacity, value)
    }

    pub fn var(self, name: impl Into<String>, value: f64) -> Self {
        self.with(Property::var(name), value)
    }

    pub fn with(mut self, property: Property, value: f64) -> Self {
        match self.0.iter_mut().find(|(p, _)| *p == property) {
            Some(slot) => slot.1 = value,
            None => self.0.push((property, value)),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Property, f64)> {
        self.0.iter()
    }

    pub(crate) fn all_finite(&self) -> bool {
        self.0.iter().all(|(_, v)| v.is_finite())
    }
}
