//! App state store
//!
//! Single source of truth for the panel. Every mutation goes through a
//! setter that validates its input, ignores invalid values without error,
//! and emits the matching bus event only when the stored value changes.
//! Getters hand out copies.

mod types;

pub use types::*;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::events::{AppEvent, EventBus};

/// Smallest lens power change (as a fraction) treated as a change
const LENS_POWER_EPSILON: f64 = 0.0001;

/// Phase number before the sequence starts
pub const STARTUP_PHASE_PRE_START: i32 = -1;
/// Phase number once the sequence completes
pub const STARTUP_PHASE_COMPLETE: i32 = 99;
/// Highest resistive shutdown stage
pub const MAX_SHUTDOWN_STAGE: u8 = 3;

#[derive(Debug)]
struct StoreState {
    dials: HashMap<DialId, DialState>,
    target_colors: HashMap<TargetKey, TargetColorProperties>,
    theme: Theme,
    true_lens_power: f64,
    dial_b_interaction: DialBInteraction,
    app_status: AppStatus,
    startup_phase: i32,
    shutdown_stage: u8,
    main_power_off_disabled: bool,
}

impl Default for StoreState {
    fn default() -> Self {
        let target_colors = TargetKey::ALL
            .iter()
            .map(|key| (*key, TargetColorProperties::from_raw_hue(COLORLESS_HUE)))
            .collect();

        Self {
            dials: HashMap::new(),
            target_colors,
            theme: Theme::Dim,
            true_lens_power: 0.0,
            dial_b_interaction: DialBInteraction::Idle,
            app_status: AppStatus::Loading,
            startup_phase: STARTUP_PHASE_PRE_START,
            shutdown_stage: 0,
            main_power_off_disabled: false,
        }
    }
}

pub struct AppStateStore {
    bus: EventBus,
    state: Mutex<StoreState>,
}

impl AppStateStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // The lock is always released before emitting so listeners may call back
    // into the store.
    fn emit(&self, event: AppEvent) {
        trace!("Store emitting {:?}", event);
        self.bus.emit(event);
    }

    /// Merge `update` into the dial record, creating it on first use
    pub fn update_dial_state(&self, id: DialId, update: DialUpdate) {
        let next = {
            let mut state = self.lock();
            let existing = state.dials.get(&id).copied();
            let mut next = existing.unwrap_or_default();

            if let Some(hue) = update.hue.filter(|v| v.is_finite()) {
                next.hue = hue;
            }
            if let Some(rotation) = update.rotation.filter(|v| v.is_finite()) {
                next.rotation = rotation;
            }
            if let Some(target_hue) = update.target_hue.filter(|v| v.is_finite()) {
                next.target_hue = target_hue;
            }
            if let Some(target_rotation) = update.target_rotation.filter(|v| v.is_finite()) {
                next.target_rotation = target_rotation;
            }
            if let Some(is_dragging) = update.is_dragging {
                next.is_dragging = is_dragging;
            }
            next.hue = id.constrain_hue(next.hue);

            if existing == Some(next) {
                return;
            }
            state.dials.insert(id, next);
            next
        };

        self.emit(AppEvent::DialUpdated { id, state: next });
    }

    pub fn dial_state(&self, id: DialId) -> DialState {
        self.lock().dials.get(&id).copied().unwrap_or_default()
    }

    /// Assign a hue to a target region; non-finite hues are ignored
    pub fn set_target_color_properties(&self, target: TargetKey, raw_hue: f64) {
        if !raw_hue.is_finite() {
            debug!("Ignoring non-finite hue for target {}", target);
            return;
        }
        let properties = TargetColorProperties::from_raw_hue(raw_hue);
        {
            let mut state = self.lock();
            if state.target_colors.get(&target) == Some(&properties) {
                return;
            }
            state.target_colors.insert(target, properties);
        }
        self.emit(AppEvent::TargetColorChanged { target, properties });
    }

    pub fn target_color_properties(&self, target: TargetKey) -> TargetColorProperties {
        self.lock()
            .target_colors
            .get(&target)
            .copied()
            .unwrap_or_else(|| TargetColorProperties::from_raw_hue(COLORLESS_HUE))
    }

    pub fn set_theme(&self, theme: Theme) {
        {
            let mut state = self.lock();
            if state.theme == theme {
                return;
            }
            state.theme = theme;
        }
        debug!("Theme changed to {}", theme);
        self.emit(AppEvent::ThemeChanged(theme));
    }

    pub fn theme(&self) -> Theme {
        self.lock().theme
    }

    /// Set lens power from a percentage in [0, 100]; stored as a fraction
    pub fn set_true_lens_power(&self, percent: f64) {
        if !percent.is_finite() {
            debug!("Ignoring non-finite lens power");
            return;
        }
        let power = percent.clamp(0.0, 100.0) / 100.0;
        {
            let mut state = self.lock();
            if (state.true_lens_power - power).abs() < LENS_POWER_EPSILON {
                return;
            }
            state.true_lens_power = power;
        }
        self.emit(AppEvent::TrueLensPowerChanged(power));
    }

    /// Lens power as a fraction in [0, 1]
    pub fn true_lens_power(&self) -> f64 {
        self.lock().true_lens_power
    }

    pub fn set_dial_b_interaction_state(&self, interaction: DialBInteraction) {
        {
            let mut state = self.lock();
            if state.dial_b_interaction == interaction {
                return;
            }
            state.dial_b_interaction = interaction;
        }
        self.emit(AppEvent::DialBInteractionChange(interaction));
    }

    pub fn dial_b_interaction_state(&self) -> DialBInteraction {
        self.lock().dial_b_interaction
    }

    pub fn set_app_status(&self, status: AppStatus) {
        let previous = {
            let mut state = self.lock();
            if state.app_status == status {
                return;
            }
            std::mem::replace(&mut state.app_status, status)
        };
        debug!("App status {} -> {}", previous, status);
        self.emit(AppEvent::AppStatusChanged(status));
    }

    pub fn app_status(&self) -> AppStatus {
        self.lock().app_status
    }

    /// Accepts -1 (pre-start), 0..=11, or 99 (complete)
    pub fn set_current_startup_phase_number(&self, phase: i32) {
        let valid = phase == STARTUP_PHASE_PRE_START
            || phase == STARTUP_PHASE_COMPLETE
            || (0..=11).contains(&phase);
        if !valid {
            debug!("Ignoring invalid startup phase number {}", phase);
            return;
        }
        {
            let mut state = self.lock();
            if state.startup_phase == phase {
                return;
            }
            state.startup_phase = phase;
        }
        self.emit(AppEvent::StartupPhaseNumberChanged(phase));
    }

    pub fn current_startup_phase_number(&self) -> i32 {
        self.lock().startup_phase
    }

    pub fn set_resistive_shutdown_stage(&self, stage: u8) {
        if stage > MAX_SHUTDOWN_STAGE {
            debug!("Ignoring invalid resistive shutdown stage {}", stage);
            return;
        }
        {
            let mut state = self.lock();
            if state.shutdown_stage == stage {
                return;
            }
            state.shutdown_stage = stage;
        }
        self.emit(AppEvent::ResistiveShutdownStageChanged(stage));
    }

    pub fn resistive_shutdown_stage(&self) -> u8 {
        self.lock().shutdown_stage
    }

    pub fn set_is_main_power_off_button_disabled(&self, disabled: bool) {
        {
            let mut state = self.lock();
            if state.main_power_off_disabled == disabled {
                return;
            }
            state.main_power_off_disabled = disabled;
        }
        self.emit(AppEvent::MainPowerOffButtonDisabledChanged(disabled));
    }

    pub fn is_main_power_off_button_disabled(&self) -> bool {
        self.lock().main_power_off_disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;
    use std::sync::Arc;

    fn recording_store(topic: Topic) -> (AppStateStore, Arc<Mutex<Vec<AppEvent>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(topic, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        (AppStateStore::new(bus), seen)
    }

    #[test]
    fn test_set_theme_twice_emits_once() {
        let (store, seen) = recording_store(Topic::ThemeChanged);
        store.set_theme(Theme::Dark);
        store.set_theme(Theme::Dark);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(store.theme(), Theme::Dark);
    }

    #[test]
    fn test_dial_b_interaction_emits_on_change_only() {
        let (store, seen) = recording_store(Topic::DialBInteractionChange);
        store.set_dial_b_interaction_state(DialBInteraction::Idle);
        store.set_dial_b_interaction_state(DialBInteraction::Dragging);
        store.set_dial_b_interaction_state(DialBInteraction::Dragging);
        store.set_dial_b_interaction_state(DialBInteraction::Settling);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            seen[1],
            AppEvent::DialBInteractionChange(DialBInteraction::Settling)
        ));
        assert_eq!(store.dial_b_interaction_state(), DialBInteraction::Settling);
    }

    #[test]
    fn test_dial_a_wraps() {
        let (store, _) = recording_store(Topic::DialUpdated);
        store.update_dial_state(DialId::A, DialUpdate::hue(370.0));
        assert_eq!(store.dial_state(DialId::A).hue, 10.0);
    }

    #[test]
    fn test_dial_b_clamps() {
        let (store, _) = recording_store(Topic::DialUpdated);
        store.update_dial_state(DialId::B, DialUpdate::hue(370.0));
        assert_eq!(store.dial_state(DialId::B).hue, 359.999);
        store.update_dial_state(DialId::B, DialUpdate::hue(-5.0));
        assert_eq!(store.dial_state(DialId::B).hue, 0.0);
    }

    #[test]
    fn test_rotation_is_never_wrapped() {
        let (store, _) = recording_store(Topic::DialUpdated);
        let update = DialUpdate {
            rotation: Some(1080.0),
            ..DialUpdate::default()
        };
        store.update_dial_state(DialId::B, update);
        assert_eq!(store.dial_state(DialId::B).rotation, 1080.0);
    }

    #[test]
    fn test_dial_update_emits_only_on_change() {
        let (store, seen) = recording_store(Topic::DialUpdated);
        // First use always emits, even with default values
        store.update_dial_state(DialId::A, DialUpdate::default());
        store.update_dial_state(DialId::A, DialUpdate::default());
        store.update_dial_state(DialId::A, DialUpdate::hue(20.0));
        store.update_dial_state(DialId::A, DialUpdate::hue(380.0));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            seen[1],
            AppEvent::DialUpdated { id: DialId::A, state } if state.hue == 20.0
        ));
    }

    #[test]
    fn test_getter_returns_copy() {
        let (store, _) = recording_store(Topic::DialUpdated);
        store.update_dial_state(DialId::A, DialUpdate::hue(42.0));
        let mut copy = store.dial_state(DialId::A);
        copy.hue = 99.0;
        assert_eq!(store.dial_state(DialId::A).hue, 42.0);
    }

    #[test]
    fn test_target_color_normalizes_and_detects_colorless() {
        let (store, seen) = recording_store(Topic::TargetColorChanged);
        store.set_target_color_properties(TargetKey::Lcd, 375.0);
        let props = store.target_color_properties(TargetKey::Lcd);
        assert_eq!(props.hue, 15.0);
        assert!(!props.is_colorless);

        store.set_target_color_properties(TargetKey::Lcd, 360.0);
        assert!(store.target_color_properties(TargetKey::Lcd).is_colorless);

        store.set_target_color_properties(TargetKey::Lcd, 720.0);
        store.set_target_color_properties(TargetKey::Lcd, f64::NAN);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_lens_power_percentage_and_threshold() {
        let (store, seen) = recording_store(Topic::TrueLensPowerChanged);
        store.set_true_lens_power(50.0);
        assert_eq!(store.true_lens_power(), 0.5);
        store.set_true_lens_power(50.005);
        store.set_true_lens_power(250.0);
        assert_eq!(store.true_lens_power(), 1.0);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let (store, seen) = recording_store(Topic::StartupPhaseNumberChanged);
        store.set_current_startup_phase_number(12);
        store.set_current_startup_phase_number(-7);
        store.set_current_startup_phase_number(99);
        assert_eq!(store.current_startup_phase_number(), 99);
        assert_eq!(seen.lock().unwrap().len(), 1);

        store.set_resistive_shutdown_stage(4);
        assert_eq!(store.resistive_shutdown_stage(), 0);
    }

    #[test]
    fn test_app_status_and_power_flag() {
        let (store, seen) = recording_store(Topic::AppStatusChanged);
        store.set_app_status(AppStatus::Error);
        store.set_app_status(AppStatus::Error);
        assert_eq!(seen.lock().unwrap().len(), 1);

        store.set_is_main_power_off_button_disabled(true);
        assert!(store.is_main_power_off_button_disabled());
    }

    #[test]
    fn test_listener_can_read_store_during_emit() {
        let bus = EventBus::new();
        let store = Arc::new(AppStateStore::new(bus.clone()));
        let seen = Arc::new(Mutex::new(None));

        let reader = Arc::downgrade(&store);
        let sink = seen.clone();
        bus.subscribe(Topic::ThemeChanged, move |_| {
            if let Some(store) = reader.upgrade() {
                *sink.lock().unwrap() = Some(store.theme());
            }
            Ok(())
        });

        store.set_theme(Theme::Light);
        assert_eq!(*seen.lock().unwrap(), Some(Theme::Light));
    }
}
