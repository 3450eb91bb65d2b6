//! Resistive shutdown
//!
//! Reacts to the store's shutdown stage. Each stage pushes the panel further
//! away from powering off: dial A is retargeted, dial B and the lens are
//! driven up, and every hue assignment group jumps to the row nearest the
//! stage hue. At the last stage the main power controls are disabled until
//! the stage is reset to 0.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

use crate::dials::DialAnimator;
use crate::events::{AppEvent, MessageKind, Subscription, TerminalMessage, Topic};
use crate::flicker::{create_advanced_flicker, FlickerOptions};
use crate::panel::{
    add_state, has_state, remove_state, AssignmentButton, Panel, MAIN_POWER_GROUP, STATE_DISABLED,
    STATE_ENERGIZED, STATE_SELECTED,
};
use crate::state::{
    AppStateStore, DialId, DialUpdate, TargetKey, DIAL_B_MAX_HUE, MAX_SHUTDOWN_STAGE,
};
use crate::timeline::{Callback, Element, ElementHandle, PlayOptions, Playback};

/// Seconds dial A takes to reach a stage hue
const DIAL_DURATION: f64 = 0.8;

/// How dial B's power moves at a stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerRule {
    /// Add to the current power, clamped to [0, 1]
    Add(f64),
    Absolute(f64),
}

impl PowerRule {
    pub fn apply(self, current: f64) -> f64 {
        match self {
            PowerRule::Add(delta) => (current + delta).clamp(0.0, 1.0),
            PowerRule::Absolute(power) => power.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParams {
    pub flash_profile: &'static str,
    pub message_key: &'static str,
    pub dial_a_hue: f64,
    pub dial_b_power: PowerRule,
    pub grid_hue: f64,
}

const STAGES: [StageParams; MAX_SHUTDOWN_STAGE as usize] = [
    StageParams {
        flash_profile: "resistive-shutdown-flash",
        message_key: "shutdownStage1",
        dial_a_hue: 15.0,
        dial_b_power: PowerRule::Add(0.25),
        grid_hue: 15.0,
    },
    StageParams {
        flash_profile: "resistive-shutdown-flash",
        message_key: "shutdownStage2",
        dial_a_hue: 5.0,
        dial_b_power: PowerRule::Add(0.35),
        grid_hue: 30.0,
    },
    StageParams {
        flash_profile: "resistive-shutdown-flash-strong",
        message_key: "shutdownStage3",
        dial_a_hue: 0.0,
        dial_b_power: PowerRule::Absolute(1.0),
        grid_hue: 350.0,
    },
];

/// Parameters of `stage`; `None` for 0 and out of range stages
pub fn stage_params(stage: u8) -> Option<&'static StageParams> {
    usize::from(stage).checked_sub(1).and_then(|i| STAGES.get(i))
}

/// Row whose hue is nearest `hue`; the first row wins a tie
pub fn nearest_row(buttons: &[AssignmentButton], hue: f64) -> Option<&AssignmentButton> {
    let mut best: Option<(&AssignmentButton, f64)> = None;
    for button in buttons {
        let distance = (button.hue - hue).abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((button, distance));
        }
    }
    best.map(|(button, _)| button)
}

/// Panel state captured when the first stage is entered
#[derive(Debug, Clone)]
struct Snapshot {
    dial_a_hue: f64,
    dial_b_hue: f64,
    lens_percent: f64,
    target_hues: HashMap<TargetKey, f64>,
    /// Selected grid row per target; `None` when nothing was selected
    selected_rows: HashMap<TargetKey, Option<usize>>,
}

#[derive(Default)]
struct ControllerState {
    snapshot: Option<Snapshot>,
    flashes: Vec<Playback>,
}

pub struct ShutdownController {
    store: Arc<AppStateStore>,
    panel: Arc<dyn Panel>,
    dials: Option<Arc<DialAnimator>>,
    options: PlayOptions,
    state: Mutex<ControllerState>,
}

impl ShutdownController {
    pub fn new(
        store: Arc<AppStateStore>,
        panel: Arc<dyn Panel>,
        dials: Option<Arc<DialAnimator>>,
        options: PlayOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            panel,
            dials,
            options,
            state: Mutex::new(ControllerState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// React to shutdown stage changes on the store's bus
    pub fn attach(self: &Arc<Self>) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.store
            .bus()
            .subscribe(Topic::ResistiveShutdownStageChanged, move |event| {
                if let (AppEvent::ResistiveShutdownStageChanged(stage), Some(controller)) =
                    (event, weak.upgrade())
                {
                    controller.apply_stage(*stage);
                }
                Ok(())
            })
    }

    /// Move the store to the next stage; a no-op at the last stage
    pub fn advance(&self) -> u8 {
        let current = self.store.resistive_shutdown_stage();
        if current >= MAX_SHUTDOWN_STAGE {
            debug!("Resistive shutdown already at stage {}", current);
            return current;
        }
        self.store.set_resistive_shutdown_stage(current + 1);
        current + 1
    }

    pub fn apply_stage(&self, stage: u8) {
        if stage == 0 {
            self.reset();
            return;
        }
        let Some(params) = stage_params(stage) else {
            warn!("No parameters for resistive shutdown stage {}", stage);
            return;
        };
        info!("Resistive shutdown stage {}", stage);

        {
            let mut state = self.lock();
            if state.snapshot.is_none() {
                state.snapshot = Some(self.capture());
            }
        }

        self.store.bus().emit(AppEvent::TerminalMessageRequested(TerminalMessage::new(
            MessageKind::Shutdown,
            "ResistiveShutdown",
            params.message_key,
        )));

        self.move_dial(DialId::A, params.dial_a_hue);
        let current_power = self.store.dial_state(DialId::B).target_hue / DIAL_B_MAX_HUE;
        let power = params.dial_b_power.apply(current_power);
        self.move_dial(DialId::B, power * DIAL_B_MAX_HUE);
        self.store.set_true_lens_power(power * 100.0);

        for target in TargetKey::ALL {
            self.select_nearest(target, params);
        }

        if stage >= MAX_SHUTDOWN_STAGE {
            for button in self.panel.button_group(MAIN_POWER_GROUP) {
                add_state(&button, STATE_DISABLED);
            }
            self.store.set_is_main_power_off_button_disabled(true);
        }
    }

    fn capture(&self) -> Snapshot {
        Snapshot {
            dial_a_hue: self.store.dial_state(DialId::A).hue,
            dial_b_hue: self.store.dial_state(DialId::B).hue,
            lens_percent: self.store.true_lens_power() * 100.0,
            target_hues: TargetKey::ALL
                .into_iter()
                .map(|t| (t, self.store.target_color_properties(t).hue))
                .collect(),
            selected_rows: TargetKey::ALL
                .into_iter()
                .map(|t| (t, self.selected_row(t)))
                .collect(),
        }
    }

    fn selected_row(&self, target: TargetKey) -> Option<usize> {
        self.panel
            .assignment_buttons(target)
            .iter()
            .find(|b| has_state(&b.element, STATE_SELECTED))
            .map(|b| b.row)
    }

    /// Select `row` in the grid of `target` and deselect every other row
    fn restore_selection(&self, target: TargetKey, row: Option<usize>) {
        for button in self.panel.assignment_buttons(target) {
            if Some(button.row) == row {
                add_state(&button.element, STATE_ENERGIZED);
                add_state(&button.element, STATE_SELECTED);
            } else {
                remove_state(&button.element, STATE_SELECTED);
            }
        }
    }

    fn reset(&self) {
        let (snapshot, flashes) = {
            let mut state = self.lock();
            (state.snapshot.take(), std::mem::take(&mut state.flashes))
        };
        for flash in flashes {
            flash.kill();
        }

        if let Some(snapshot) = snapshot {
            debug!("Restoring panel state from before resistive shutdown");
            self.move_dial(DialId::A, snapshot.dial_a_hue);
            self.move_dial(DialId::B, snapshot.dial_b_hue);
            self.store.set_true_lens_power(snapshot.lens_percent);
            for (target, hue) in snapshot.target_hues {
                self.store.set_target_color_properties(target, hue);
            }
            for (target, row) in snapshot.selected_rows {
                self.restore_selection(target, row);
            }
        }

        for button in self.panel.button_group(MAIN_POWER_GROUP) {
            remove_state(&button, STATE_DISABLED);
        }
        self.store.set_is_main_power_off_button_disabled(false);
    }

    fn move_dial(&self, id: DialId, hue: f64) {
        let animated = self
            .dials
            .as_ref()
            .map(|dials| dials.animate_to(id, hue, DIAL_DURATION));
        match animated {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("Dial {} animation failed: {}", id, e),
            None => {
                let hue = id.constrain_hue(hue);
                self.store.update_dial_state(
                    id,
                    DialUpdate {
                        hue: Some(hue),
                        target_hue: Some(hue),
                        ..DialUpdate::default()
                    },
                );
            }
        }
    }

    fn select_nearest(&self, target: TargetKey, params: &StageParams) {
        let buttons = self.panel.assignment_buttons(target);
        let Some(chosen) = nearest_row(&buttons, params.grid_hue) else {
            warn!("No hue assignment buttons for {}", target);
            return;
        };

        for button in &buttons {
            if button.row != chosen.row && has_state(&button.element, STATE_SELECTED) {
                remove_state(&button.element, STATE_SELECTED);
            }
        }
        self.flash(&chosen.element, params.flash_profile);
        self.store.set_target_color_properties(target, chosen.hue);
    }

    /// Put `button` into the selected state, flickering it when a runtime is available
    fn flash(&self, button: &ElementHandle, profile: &'static str) {
        let selected = format!("{} {}", STATE_ENERGIZED, STATE_SELECTED);
        if tokio::runtime::Handle::try_current().is_err() {
            button.set_state(&selected);
            return;
        }

        let element = button.clone();
        let on_start: Callback = Box::new(move || {
            element.set_state(&selected);
            Ok(())
        });
        let options = FlickerOptions {
            on_start: Some(on_start),
            ..FlickerOptions::default()
        };
        match create_advanced_flicker(&[button.clone()], profile, options) {
            Ok(effect) => {
                let playback = effect.play(self.options);
                let mut state = self.lock();
                state.flashes.retain(|p| !p.is_finished());
                state.flashes.push(playback);
            }
            Err(e) => warn!("Flicker '{}' failed for {}: {}", profile, button.id(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::panel::HeadlessPanel;
    use crate::state::HUE_ASSIGNMENT_TABLE;

    fn controller() -> (Arc<AppStateStore>, Arc<dyn Panel>, Arc<ShutdownController>) {
        let store = Arc::new(AppStateStore::new(EventBus::new()));
        let panel: Arc<dyn Panel> = Arc::new(HeadlessPanel::standard());
        let dials = Arc::new(DialAnimator::new(store.clone(), PlayOptions::default()));
        let controller =
            ShutdownController::new(store.clone(), panel.clone(), Some(dials), PlayOptions::default());
        controller.attach();
        (store, panel, controller)
    }

    #[test]
    fn test_dial_b_power_never_decreases() {
        let (store, _panel, controller) = controller();
        let mut previous = store.dial_state(DialId::B).target_hue;

        for expected in 1..=MAX_SHUTDOWN_STAGE {
            assert_eq!(controller.advance(), expected);
            let target = store.dial_state(DialId::B).target_hue;
            assert!(target >= previous, "stage {}: {} < {}", expected, target, previous);
            previous = target;
        }

        assert!((store.dial_state(DialId::B).target_hue - DIAL_B_MAX_HUE).abs() < 1e-9);
        assert!((store.true_lens_power() - 1.0).abs() < 1e-9);
        assert!(store.is_main_power_off_button_disabled());
        assert_eq!(controller.advance(), MAX_SHUTDOWN_STAGE);
    }

    #[test]
    fn test_last_stage_disables_main_power() {
        let (store, panel, _controller) = controller();
        store.set_resistive_shutdown_stage(MAX_SHUTDOWN_STAGE);

        assert!(store.is_main_power_off_button_disabled());
        for button in panel.button_group(MAIN_POWER_GROUP) {
            assert!(has_state(&button, STATE_DISABLED));
        }
        assert_eq!(store.dial_state(DialId::A).hue, 0.0);
    }

    #[test]
    fn test_stage_zero_restores_panel() {
        let (store, panel, _controller) = controller();
        store.update_dial_state(DialId::A, DialUpdate::hue(183.0));
        store.set_true_lens_power(25.0);

        store.set_resistive_shutdown_stage(1);
        assert_eq!(store.dial_state(DialId::A).hue, 15.0);
        store.set_resistive_shutdown_stage(3);
        store.set_resistive_shutdown_stage(0);

        assert!(!store.is_main_power_off_button_disabled());
        assert_eq!(store.dial_state(DialId::A).hue, 183.0);
        assert!((store.true_lens_power() - 0.25).abs() < 1e-9);
        for button in panel.button_group(MAIN_POWER_GROUP) {
            assert!(!has_state(&button, STATE_DISABLED));
        }
    }

    #[test]
    fn test_stage_zero_restores_grid_selection() {
        let (store, panel, _controller) = controller();
        let env = panel.assignment_buttons(TargetKey::Env);
        env[7].element.set_state(STATE_SELECTED);
        store.set_target_color_properties(TargetKey::Env, HUE_ASSIGNMENT_TABLE[7]);

        store.set_resistive_shutdown_stage(1);
        store.set_resistive_shutdown_stage(0);

        let selected = |target: TargetKey| -> Vec<usize> {
            panel
                .assignment_buttons(target)
                .iter()
                .filter(|b| has_state(&b.element, STATE_SELECTED))
                .map(|b| b.row)
                .collect()
        };
        // Grid and store agree on the row that was selected before shutdown
        assert_eq!(selected(TargetKey::Env), vec![7]);
        assert_eq!(store.target_color_properties(TargetKey::Env).hue, HUE_ASSIGNMENT_TABLE[7]);
        assert!(selected(TargetKey::Lcd).is_empty());
    }

    #[test]
    fn test_nearest_row_prefers_first_on_tie() {
        let (_store, panel, _controller) = controller();
        let buttons = panel.assignment_buttons(TargetKey::Env);

        // 30 is equidistant from rows 1 (15) and 2 (45)
        assert_eq!(nearest_row(&buttons, 30.0).map(|b| b.row), Some(1));
        assert_eq!(nearest_row(&buttons, 350.0).map(|b| b.row), Some(12));
        assert!(nearest_row(&[], 30.0).is_none());
    }

    #[test]
    fn test_stage_selects_one_button_per_group() {
        let (store, panel, _controller) = controller();
        let env = panel.assignment_buttons(TargetKey::Env);
        env[7].element.set_state(STATE_SELECTED);

        store.set_resistive_shutdown_stage(2);

        for target in TargetKey::ALL {
            let buttons = panel.assignment_buttons(target);
            let selected: Vec<usize> = buttons
                .iter()
                .filter(|b| has_state(&b.element, STATE_SELECTED))
                .map(|b| b.row)
                .collect();
            assert_eq!(selected, vec![1], "{}", target);
            assert!(has_state(&buttons[1].element, STATE_ENERGIZED));
            assert_eq!(store.target_color_properties(target).hue, HUE_ASSIGNMENT_TABLE[1]);
        }
    }

    #[test]
    fn test_power_rules() {
        assert_eq!(PowerRule::Add(0.35).apply(0.8), 1.0);
        assert_eq!(PowerRule::Add(0.25).apply(0.0), 0.25);
        assert_eq!(PowerRule::Absolute(1.0).apply(0.1), 1.0);
        assert!(stage_params(0).is_none());
        assert!(stage_params(4).is_none());
        assert_eq!(stage_params(3).map(|p| p.grid_hue), Some(350.0));
    }
}
