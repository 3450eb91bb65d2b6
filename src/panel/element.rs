//! In-memory element

use std::collections::HashMap;
use std::sync::Mutex;

use crate::timeline::{Element, Property};

/// Element backed by a property map, standing in for a DOM node
#[derive(Debug)]
pub struct PanelElement {
    id: String,
    label: Option<String>,
    values: Mutex<HashMap<Property, f64>>,
    state: Mutex<String>,
}

impl PanelElement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            values: Mutex::new(HashMap::new()),
            state: Mutex::new(String::new()),
        }
    }

    pub fn button(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(id)
        }
    }
}

impl Element for PanelElement {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn get(&self, property: &Property) -> Option<f64> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(property)
            .copied()
    }

    fn set(&self, property: &Property, value: f64) {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(property.clone(), value);
    }

    fn state(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_state(&self, state: &str) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state.to_string();
    }
}
