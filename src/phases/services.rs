//! Services available to phases
//!
//! Phases name their dependencies with [`Dependency`] tokens which resolve
//! against the [`Services`] bundle built once at startup.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::config::PhaseConfig;
use crate::dials::DialAnimator;
use crate::events::EventBus;
use crate::panel::{AudioPlayer, LensEnergizer, Panel};
use crate::state::{AppStateStore, Theme};

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("dependency {0} is not registered")]
    Unavailable(Dependency),
    #[error("no elements found for {0}")]
    MissingTarget(String),
}

/// Typed name of a phase dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Store,
    Bus,
    Panel,
    Audio,
    Lens,
    Dials,
    Settings,
    /// The configuration of the phase being built
    Phase,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Store => "appState",
            Dependency::Bus => "eventBus",
            Dependency::Panel => "panel",
            Dependency::Audio => "audioManager",
            Dependency::Lens => "lensManager",
            Dependency::Dials => "dialManager",
            Dependency::Settings => "settings",
            Dependency::Phase => "self",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Panel settings phases need at run time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelSettings {
    pub interactive_theme: Theme,
    pub dial_a_hue: f64,
    pub dial_b_hue: f64,
    pub lens_power: f64,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            interactive_theme: Theme::Dark,
            dial_a_hue: 183.0,
            dial_b_hue: 0.0,
            lens_power: 25.0,
        }
    }
}

/// A resolved dependency passed to a phase call
#[derive(Clone)]
pub enum Resolved {
    Store(Arc<AppStateStore>),
    Bus(EventBus),
    Panel(Arc<dyn Panel>),
    Audio(Arc<dyn AudioPlayer>),
    Lens(Arc<dyn LensEnergizer>),
    Dials(Arc<DialAnimator>),
    Settings(PanelSettings),
    Phase(Arc<PhaseConfig>),
}

impl Resolved {
    pub fn store(&self) -> Option<&Arc<AppStateStore>> {
        match self {
            Resolved::Store(store) => Some(store),
            _ => None,
        }
    }

    pub fn bus(&self) -> Option<&EventBus> {
        match self {
            Resolved::Bus(bus) => Some(bus),
            _ => None,
        }
    }

    pub fn panel(&self) -> Option<&Arc<dyn Panel>> {
        match self {
            Resolved::Panel(panel) => Some(panel),
            _ => None,
        }
    }

    pub fn dials(&self) -> Option<&Arc<DialAnimator>> {
        match self {
            Resolved::Dials(dials) => Some(dials),
            _ => None,
        }
    }

    pub fn settings(&self) -> Option<&PanelSettings> {
        match self {
            Resolved::Settings(settings) => Some(settings),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<&Arc<PhaseConfig>> {
        match self {
            Resolved::Phase(phase) => Some(phase),
            _ => None,
        }
    }
}

/// Everything a phase may depend on, built once at startup
#[derive(Clone)]
pub struct Services {
    pub store: Arc<AppStateStore>,
    pub panel: Arc<dyn Panel>,
    pub audio: Option<Arc<dyn AudioPlayer>>,
    pub lens: Option<Arc<dyn LensEnergizer>>,
    pub dials: Option<Arc<DialAnimator>>,
    pub settings: PanelSettings,
}

impl Services {
    pub fn new(store: Arc<AppStateStore>, panel: Arc<dyn Panel>) -> Self {
        Self {
            store,
            panel,
            audio: None,
            lens: None,
            dials: None,
            settings: PanelSettings::default(),
        }
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioPlayer>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_lens(mut self, lens: Arc<dyn LensEnergizer>) -> Self {
        self.lens = Some(lens);
        self
    }

    pub fn with_dials(mut self, dials: Arc<DialAnimator>) -> Self {
        self.dials = Some(dials);
        self
    }

    pub fn with_settings(mut self, settings: PanelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn bus(&self) -> &EventBus {
        self.store.bus()
    }

    pub fn resolve(
        &self,
        dependency: Dependency,
        phase: &Arc<PhaseConfig>,
    ) -> Result<Resolved, ResolveError> {
        let unavailable = || ResolveError::Unavailable(dependency);
        Ok(match dependency {
            Dependency::Store => Resolved::Store(self.store.clone()),
            Dependency::Bus => Resolved::Bus(self.bus().clone()),
            Dependency::Panel => Resolved::Panel(self.panel.clone()),
            Dependency::Audio => Resolved::Audio(self.audio.clone().ok_or_else(unavailable)?),
            Dependency::Lens => Resolved::Lens(self.lens.clone().ok_or_else(unavailable)?),
            Dependency::Dials => Resolved::Dials(self.dials.clone().ok_or_else(unavailable)?),
            Dependency::Settings => Resolved::Settings(self.settings),
            Dependency::Phase => Resolved::Phase(phase.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::HeadlessPanel;

    fn phase() -> Arc<PhaseConfig> {
        Arc::new(PhaseConfig {
            phase: 3,
            name: "Test".into(),
            description: String::new(),
            terminal: None,
            duration: 0.0,
            animations: Vec::new(),
        })
    }

    #[test]
    fn test_dependency_names() {
        assert_eq!(Dependency::Phase.to_string(), "self");
        assert_eq!(Dependency::Store.to_string(), "appState");
        assert_eq!(
            ResolveError::Unavailable(Dependency::Audio).to_string(),
            "dependency audioManager is not registered"
        );
    }

    #[test]
    fn test_resolve_reports_missing_services() {
        let store = Arc::new(AppStateStore::new(EventBus::new()));
        let services = Services::new(store, Arc::new(HeadlessPanel::standard()));
        let phase = phase();

        let resolved = services.resolve(Dependency::Phase, &phase).unwrap();
        assert_eq!(resolved.phase().map(|p| p.phase), Some(3));
        assert!(services.resolve(Dependency::Store, &phase).unwrap().store().is_some());
        assert!(matches!(
            services.resolve(Dependency::Audio, &phase),
            Err(ResolveError::Unavailable(Dependency::Audio))
        ));
    }
}
