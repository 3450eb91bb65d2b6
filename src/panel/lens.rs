//! Lens energize routine

use std::sync::Arc;
use tracing::warn;

use super::Panel;
use crate::state::AppStateStore;
use crate::timeline::{Ease, Element, ElementHandle, Position, Property, Props, Timeline, TimelineError, Tween};

/// Builds the timeline that brings the lens online
pub trait LensEnergizer: Send + Sync {
    fn energize(&self) -> Result<Timeline, TimelineError>;
}

/// Exposes the store's lens power as an animatable fraction
struct LensPower {
    store: Arc<AppStateStore>,
}

impl Element for LensPower {
    fn id(&self) -> &str {
        "true-lens-power"
    }

    fn get(&self, _property: &Property) -> Option<f64> {
        Some(self.store.true_lens_power())
    }

    fn set(&self, _property: &Property, value: f64) {
        self.store.set_true_lens_power(value * 100.0);
    }
}

/// Fades the lens in while surging power past its resting level, then
/// settling on `resting_percent`.
pub struct StoreLensEnergizer {
    store: Arc<AppStateStore>,
    panel: Arc<dyn Panel>,
    resting_percent: f64,
}

impl StoreLensEnergizer {
    const SURGE_FACTOR: f64 = 1.35;

    pub fn new(store: Arc<AppStateStore>, panel: Arc<dyn Panel>, resting_percent: f64) -> Self {
        Self {
            store,
            panel,
            resting_percent: resting_percent.clamp(0.0, 100.0),
        }
    }
}

impl LensEnergizer for StoreLensEnergizer {
    fn energize(&self) -> Result<Timeline, TimelineError> {
        let lens = self.panel.elements("lens");
        if lens.is_empty() {
            warn!("No lens elements registered; energizing power only");
        }
        let power: ElementHandle = Arc::new(LensPower {
            store: self.store.clone(),
        });
        let resting = self.resting_percent / 100.0;
        let surge = (resting * Self::SURGE_FACTOR).min(1.0);

        let mut tl = Timeline::new();
        tl.set(&lens, Props::new().opacity(0.0), 0.0)?
            .tween(
                Tween::new(&lens, Props::new().opacity(1.0), 0.8).ease(Ease::Power1Out),
                0.0,
            )?
            .set(&[power.clone()], Props::new().opacity(0.0), 0.0)?
            .tween(
                Tween::new(&[power.clone()], Props::new().opacity(surge), 0.6).ease(Ease::Power2Out),
                0.1,
            )?
            .tween(
                Tween::new(&[power], Props::new().opacity(resting), 0.9).ease(Ease::SineInOut),
                Position::after_previous(),
            )?;
        Ok(tl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::panel::HeadlessPanel;

    #[tokio::test(start_paused = true)]
    async fn test_energize_settles_on_resting_power() {
        let store = Arc::new(AppStateStore::new(EventBus::new()));
        let panel: Arc<dyn Panel> = Arc::new(HeadlessPanel::standard());
        let energizer = StoreLensEnergizer::new(store.clone(), panel.clone(), 40.0);

        let tl = energizer.energize().unwrap();
        assert!((tl.duration() - 1.6).abs() < 1e-9);
        tl.play().await.unwrap();

        assert!((store.true_lens_power() - 0.4).abs() < 1e-3);
        let lens = &panel.elements("lens")[0];
        assert_eq!(lens.get(&Property::Opacity), Some(1.0));
    }
}
