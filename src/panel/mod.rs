//! Visual collaborators of the core
//!
//! The core never renders anything. It reaches the visual layer through the
//! [`Panel`] trait (element lookup, button groups, the hue assignment grid and
//! root-level style variables), the [`AudioPlayer`] trait and the
//! [`LensEnergizer`] trait. [`HeadlessPanel`] is an in-memory implementation
//! used by the headless driver and by tests.

mod element;
pub mod lens;

pub use element::PanelElement;
pub use lens::{LensEnergizer, StoreLensEnergizer};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::state::{TargetKey, HUE_ASSIGNMENT_TABLE};
use crate::timeline::{Element, ElementHandle, Property};

pub const STATE_ENERGIZED: &str = "is-energized";
pub const STATE_SELECTED: &str = "is-selected";
pub const STATE_DIMLY_LIT: &str = "is-dimly-lit";
pub const STATE_DISABLED: &str = "is-disabled";

pub const MAIN_POWER_GROUP: &str = "main-power";

/// Root variable scaling panel opacity during startup
pub const STARTUP_OPACITY_VAR: &str = "--startup-opacity-factor";

/// Buttons selected by default once a group is energized
const DEFAULT_SELECTIONS: &[(&str, &str)] = &[
    (MAIN_POWER_GROUP, "ON"),
    ("auxiliary-light", "LOW"),
    ("hue-assign-env", "ENV 7"),
    ("hue-assign-lcd", "LCD 7"),
    ("hue-assign-logo", "LOGO 7"),
    ("hue-assign-btn", "BTN 7"),
];

pub fn default_selection(group: &str) -> Option<&'static str> {
    DEFAULT_SELECTIONS
        .iter()
        .find(|(g, _)| *g == group)
        .map(|(_, label)| *label)
}

pub fn assignment_group(target: TargetKey) -> String {
    format!("hue-assign-{}", target)
}

pub fn has_state(element: &ElementHandle, class: &str) -> bool {
    element.state().split_whitespace().any(|c| c == class)
}

pub fn add_state(element: &ElementHandle, class: &str) {
    let state = element.state();
    if state.split_whitespace().any(|c| c == class) {
        return;
    }
    let next = if state.trim().is_empty() {
        class.to_string()
    } else {
        format!("{} {}", state.trim(), class)
    };
    element.set_state(&next);
}

pub fn remove_state(element: &ElementHandle, class: &str) {
    let state = element.state();
    let next: Vec<&str> = state.split_whitespace().filter(|c| *c != class).collect();
    element.set_state(&next.join(" "));
}

/// One button of the hue assignment grid
#[derive(Clone)]
pub struct AssignmentButton {
    pub row: usize,
    pub hue: f64,
    pub element: ElementHandle,
}

pub trait Panel: Send + Sync {
    /// Plain elements registered under `group`; empty when unknown
    fn elements(&self, group: &str) -> Vec<ElementHandle>;

    fn element(&self, id: &str) -> Option<ElementHandle>;

    fn button_group(&self, group: &str) -> Vec<ElementHandle>;

    /// Group name and handle of the button captioned `label`
    fn button_by_label(&self, label: &str) -> Option<(String, ElementHandle)>;

    /// Grid buttons for `target`, in row order
    fn assignment_buttons(&self, target: TargetKey) -> Vec<AssignmentButton>;

    fn root_var(&self, name: &str) -> Option<f64>;

    fn set_root_var(&self, name: &str, value: f64);
}

pub trait AudioPlayer: Send + Sync {
    fn play(&self, sound: &str);
}

/// Audio player that only logs cues
#[derive(Debug, Default)]
pub struct LoggingAudio;

impl AudioPlayer for LoggingAudio {
    fn play(&self, sound: &str) {
        info!("Audio cue: {}", sound);
    }
}

/// Element view of the panel's root variables.
///
/// `Opacity` maps to [`STARTUP_OPACITY_VAR`]; `Var(name)` maps to the root
/// variable `name`.
pub struct RootVars {
    panel: Arc<dyn Panel>,
}

impl RootVars {
    pub fn new(panel: Arc<dyn Panel>) -> Self {
        Self { panel }
    }

    fn var_name(property: &Property) -> &str {
        match property {
            Property::Opacity => STARTUP_OPACITY_VAR,
            Property::Var(name) => name,
        }
    }
}

impl Element for RootVars {
    fn id(&self) -> &str {
        "dimming-factors"
    }

    fn get(&self, property: &Property) -> Option<f64> {
        self.panel.root_var(Self::var_name(property))
    }

    fn set(&self, property: &Property, value: f64) {
        self.panel.set_root_var(Self::var_name(property), value);
    }
}

#[derive(Default)]
pub struct HeadlessPanel {
    groups: HashMap<String, Vec<ElementHandle>>,
    buttons: Vec<(String, Vec<ElementHandle>)>,
    grid: HashMap<TargetKey, Vec<AssignmentButton>>,
    root_vars: Mutex<HashMap<String, f64>>,
}

impl HeadlessPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full HUE 9000 panel
    pub fn standard() -> Self {
        Self::new()
            .with_group("terminal", &["terminal-screen"])
            .with_group("lcds", &["lcd-dial-a", "lcd-dial-b", "lcd-lens"])
            .with_group("dials", &["dial-canvas-a", "dial-canvas-b"])
            .with_group("lens", &["lens-core"])
            .with_group("logo", &["logo-container"])
            .with_group("mood-matrix", &["mood-matrix-display"])
            .with_group("panel-sections", &["panel-left", "panel-center", "panel-right"])
            .with_group("color-chips", &["chip-env", "chip-lcd", "chip-logo", "chip-btn"])
            .with_buttons(MAIN_POWER_GROUP, &["ON", "OFF"])
            .with_buttons("auxiliary-light", &["LOW", "HIGH"])
            .with_buttons("skill-scan", &["SCAN 1", "SCAN 2", "SCAN 3", "SCAN 4"])
            .with_buttons("fit-eval", &["FIT", "EVAL"])
            .with_assignment_grid()
    }

    pub fn with_group(mut self, group: &str, ids: &[&str]) -> Self {
        let elements = ids
            .iter()
            .map(|id| Arc::new(PanelElement::new(*id)) as ElementHandle)
            .collect();
        self.groups.insert(group.to_string(), elements);
        self
    }

    pub fn with_buttons(mut self, group: &str, labels: &[&str]) -> Self {
        let buttons = labels
            .iter()
            .map(|label| {
                let id = format!("{}-{}", group, label.to_lowercase().replace(' ', "-"));
                Arc::new(PanelElement::button(id, *label)) as ElementHandle
            })
            .collect();
        self.buttons.push((group.to_string(), buttons));
        self
    }

    /// Four target groups, one button per row of [`HUE_ASSIGNMENT_TABLE`]
    pub fn with_assignment_grid(mut self) -> Self {
        for target in TargetKey::ALL {
            let group = assignment_group(target);
            let prefix = target.as_str().to_uppercase();
            let buttons: Vec<AssignmentButton> = HUE_ASSIGNMENT_TABLE
                .iter()
                .enumerate()
                .map(|(row, hue)| {
                    let element: ElementHandle = Arc::new(PanelElement::button(
                        format!("{}-{}", group, row),
                        format!("{} {}", prefix, row),
                    ));
                    AssignmentButton {
                        row,
                        hue: *hue,
                        element,
                    }
                })
                .collect();

            let handles = buttons.iter().map(|b| b.element.clone()).collect();
            self.buttons.push((group, handles));
            self.grid.insert(target, buttons);
        }
        self
    }
}

impl Panel for HeadlessPanel {
    fn elements(&self, group: &str) -> Vec<ElementHandle> {
        self.groups.get(group).cloned().unwrap_or_default()
    }

    fn element(&self, id: &str) -> Option<ElementHandle> {
        self.groups
            .values()
            .chain(self.buttons.iter().map(|(_, b)| b))
            .flatten()
            .find(|el| el.id() == id)
            .cloned()
    }

    fn button_group(&self, group: &str) -> Vec<ElementHandle> {
        self.buttons
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, buttons)| buttons.clone())
            .unwrap_or_default()
    }

    fn button_by_label(&self, label: &str) -> Option<(String, ElementHandle)> {
        self.buttons.iter().find_map(|(group, buttons)| {
            buttons
                .iter()
                .find(|b| b.label() == Some(label))
                .map(|b| (group.clone(), b.clone()))
        })
    }

    fn assignment_buttons(&self, target: TargetKey) -> Vec<AssignmentButton> {
        self.grid.get(&target).cloned().unwrap_or_default()
    }

    fn root_var(&self, name: &str) -> Option<f64> {
        self.root_vars
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .copied()
    }

    fn set_root_var(&self, name: &str, value: f64) {
        debug!("Root var {} = {:.3}", name, value);
        self.root_vars
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), value);
    }
}
