//! Dial animation
//!
//! Moves a dial's hue toward a target through the store. Each dial has at most
//! one animation in flight: starting a new one kills the previous tween so two
//! writers never compete for the same dial. Rotation follows the hue without
//! wrapping, and dial B reports `Settling` while its tween runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::state::{AppStateStore, DialBInteraction, DialId, DialUpdate};
use crate::timeline::{
    Ease, Element, ElementHandle, PlayOptions, Playback, Property, Props, Timeline, TimelineError,
    Tween,
};

/// Element view of one dial's hue; rotation moves by the same amount
struct DialProxy {
    store: Arc<AppStateStore>,
    id: DialId,
    name: String,
    hue_origin: f64,
    rotation_origin: f64,
}

impl Element for DialProxy {
    fn id(&self) -> &str {
        &self.name
    }

    fn get(&self, _property: &Property) -> Option<f64> {
        Some(self.store.dial_state(self.id).hue)
    }

    fn set(&self, _property: &Property, value: f64) {
        self.store.update_dial_state(
            self.id,
            DialUpdate {
                hue: Some(value),
                rotation: Some(self.rotation_origin + (value - self.hue_origin)),
                ..DialUpdate::default()
            },
        );
    }
}

/// Signed shortest rotation from `from` to `to` on the hue wheel
fn shortest_delta(from: f64, to: f64) -> f64 {
    (to - from + 540.0).rem_euclid(360.0) - 180.0
}

pub struct DialAnimator {
    store: Arc<AppStateStore>,
    options: PlayOptions,
    active: Mutex<HashMap<DialId, Playback>>,
}

impl DialAnimator {
    pub fn new(store: Arc<AppStateStore>, options: PlayOptions) -> Self {
        Self {
            store,
            options,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Animate dial `id` to `target_hue` over `duration` seconds.
    ///
    /// Dial A takes the shortest way around the wheel; dial B moves linearly
    /// within its clamped range. Without a tokio runtime the hue is applied
    /// immediately.
    pub fn animate_to(&self, id: DialId, target_hue: f64, duration: f64) -> Result<(), TimelineError> {
        if !target_hue.is_finite() {
            return Err(TimelineError::InvalidValue);
        }
        let target = id.constrain_hue(target_hue);
        self.kill(id);

        let state = self.store.dial_state(id);
        let delta = match id {
            DialId::A => shortest_delta(state.hue, target),
            DialId::B => target - state.hue,
        };
        self.store.update_dial_state(
            id,
            DialUpdate {
                target_hue: Some(target),
                target_rotation: Some(state.rotation + delta),
                ..DialUpdate::default()
            },
        );

        if tokio::runtime::Handle::try_current().is_err() || duration <= 0.0 {
            self.store.update_dial_state(
                id,
                DialUpdate {
                    hue: Some(target),
                    rotation: Some(state.rotation + delta),
                    ..DialUpdate::default()
                },
            );
            self.settle(id);
            return Ok(());
        }

        let proxy: ElementHandle = Arc::new(DialProxy {
            store: self.store.clone(),
            id,
            name: format!("dial-{}", id),
            hue_origin: state.hue,
            rotation_origin: state.rotation,
        });

        let mut tl = Timeline::new();
        tl.tween(
            Tween::new(&[proxy], Props::new().var("hue", state.hue + delta), duration)
                .ease(Ease::Power2Out),
            0.0,
        )?;
        if id == DialId::B {
            let store = self.store.clone();
            tl.on_complete(move || {
                store.set_dial_b_interaction_state(DialBInteraction::Idle);
                Ok(())
            });
            self.store.set_dial_b_interaction_state(DialBInteraction::Settling);
        }
        debug!("Dial {} animating {:.1} -> {:.1}", id, state.hue, target);

        let playback = tl.play_with(self.options);
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, playback);
        Ok(())
    }

    fn settle(&self, id: DialId) {
        if id == DialId::B {
            self.store.set_dial_b_interaction_state(DialBInteraction::Idle);
        }
    }

    /// Kill the animation in flight for `id`, if any
    fn kill(&self, id: DialId) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        if let Some(previous) = previous {
            previous.kill();
        }
    }

    #[cfg(test)]
    pub fn is_animating(&self, id: DialId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .is_some_and(|playback| !playback.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AppEvent, EventBus, Topic};
    use crate::state::DIAL_B_MAX_HUE;
    use std::time::Duration;

    fn animator() -> (Arc<AppStateStore>, DialAnimator) {
        let store = Arc::new(AppStateStore::new(EventBus::new()));
        let animator = DialAnimator::new(store.clone(), PlayOptions::default());
        (store, animator)
    }

    #[test]
    fn test_shortest_delta() {
        assert_eq!(shortest_delta(350.0, 10.0), 20.0);
        assert_eq!(shortest_delta(10.0, 350.0), -20.0);
        assert_eq!(shortest_delta(0.0, 90.0), 90.0);
    }

    #[test]
    fn test_without_runtime_applies_immediately() {
        let (store, animator) = animator();
        animator.animate_to(DialId::B, 400.0, 1.0).unwrap();
        let state = store.dial_state(DialId::B);
        assert_eq!(state.hue, DIAL_B_MAX_HUE);
        assert_eq!(state.target_hue, DIAL_B_MAX_HUE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_a_wraps_across_zero() {
        let (store, animator) = animator();
        store.update_dial_state(DialId::A, DialUpdate::hue(350.0));
        animator.animate_to(DialId::A, 10.0, 0.5).unwrap();
        assert!(animator.is_animating(DialId::A));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let mid = store.dial_state(DialId::A).hue;
        assert!(mid > 350.0 || mid < 10.0, "went the long way: {}", mid);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!((store.dial_state(DialId::A).hue - 10.0).abs() < 1e-9);
        assert!(!animator.is_animating(DialId::A));
    }

    #[test]
    fn test_rotation_follows_hue_without_wrapping() {
        let (store, animator) = animator();
        store.update_dial_state(DialId::A, DialUpdate::hue(350.0));
        animator.animate_to(DialId::A, 10.0, 0.0).unwrap();

        let state = store.dial_state(DialId::A);
        assert_eq!(state.hue, 10.0);
        assert!((state.rotation - 20.0).abs() < 1e-9);
        assert!((state.target_rotation - 20.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_b_settles_while_animating() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(Topic::DialBInteractionChange, move |event| {
            if let AppEvent::DialBInteractionChange(interaction) = event {
                sink.lock().unwrap().push(*interaction);
            }
            Ok(())
        });
        let store = Arc::new(AppStateStore::new(bus));
        let animator = DialAnimator::new(store.clone(), PlayOptions::default());

        animator.animate_to(DialId::B, 200.0, 0.5).unwrap();
        assert_eq!(store.dial_b_interaction_state(), DialBInteraction::Settling);
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Retargeting mid-flight stays settling without a second event
        animator.animate_to(DialId::B, 100.0, 0.3).unwrap();
        // Dial A never touches the dial B interaction state
        animator.animate_to(DialId::A, 90.0, 0.3).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.dial_b_interaction_state(), DialBInteraction::Idle);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![DialBInteraction::Settling, DialBInteraction::Idle]
        );
        let state = store.dial_state(DialId::B);
        assert!((state.rotation - 100.0).abs() < 1e-9);
        assert!((state.target_rotation - 100.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_move_returns_dial_b_to_idle() {
        let (store, animator) = animator();
        animator.animate_to(DialId::B, 300.0, 2.0).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        animator.animate_to(DialId::B, 50.0, 0.0).unwrap();
        assert_eq!(store.dial_b_interaction_state(), DialBInteraction::Idle);
        assert!(!animator.is_animating(DialId::B));

        // The killed tween no longer writes
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.dial_state(DialId::B).hue, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_animation_kills_previous() {
        let (store, animator) = animator();
        animator.animate_to(DialId::B, 300.0, 2.0).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        animator.animate_to(DialId::B, 20.0, 0.2).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let state = store.dial_state(DialId::B);
        assert!((state.hue - 20.0).abs() < 1e-9);
        assert_eq!(state.target_hue, 20.0);
    }
}
