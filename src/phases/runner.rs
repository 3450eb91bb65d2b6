//! Phase runner
//!
//! Builds one master timeline per phase from its directives and plays it.
//! A directive whose targets or dependencies cannot be resolved is logged and
//! skipped; only a timeline that cannot be assembled fails the phase.

use anyhow::anyhow;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::config::{AnimationDirective, PhaseConfig, TargetSelector, TerminalCue};
use super::services::{ResolveError, Resolved, Services};
use crate::events::{AppEvent, MessageKind, TerminalMessage};
use crate::flicker::{create_advanced_flicker, FlickerOptions};
use crate::panel::{
    add_state, default_selection, RootVars, STARTUP_OPACITY_VAR, STATE_DIMLY_LIT,
    STATE_ENERGIZED, STATE_SELECTED,
};
use crate::startup::{PhaseDescriptor, PhaseExecutor, PhaseId};
use crate::timeline::{
    Callback, Ease, ElementHandle, PlayOptions, Position, Props, Timeline, TimelineError, Tween,
};

const MESSAGE_SOURCE: &str = "PhaseRunner";
const TERMINAL_GROUP: &str = "terminal";
const LCD_POWER_ON_PROFILE: &str = "lcd-to-on";
const LCD_CONTENT_VAR: &str = "--lcd-content-opacity";
const LCD_CONTENT_FADE: f64 = 0.4;

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("failed to build phase {phase}")]
    Build {
        phase: u8,
        #[source]
        source: TimelineError,
    },
    #[error("phase {phase} playback failed")]
    Playback {
        phase: u8,
        #[source]
        source: TimelineError,
    },
}

/// A resolved element with the button group it belongs to
struct Target {
    element: ElementHandle,
    group: Option<String>,
}

fn resolve_targets(selector: &TargetSelector, services: &Services) -> Result<Vec<Target>, ResolveError> {
    let panel = &services.panel;
    let plain = |elements: Vec<ElementHandle>| {
        elements
            .into_iter()
            .map(|element| Target {
                element,
                group: None,
            })
            .collect::<Vec<_>>()
    };
    let in_group = |group: &str, elements: Vec<ElementHandle>| {
        elements
            .into_iter()
            .map(|element| Target {
                element,
                group: Some(group.to_string()),
            })
            .collect::<Vec<_>>()
    };

    let targets = match selector {
        TargetSelector::Named(name) => {
            let elements = panel.elements(name);
            if !elements.is_empty() {
                plain(elements)
            } else {
                let buttons = panel.button_group(name);
                if !buttons.is_empty() {
                    in_group(name, buttons)
                } else {
                    plain(panel.element(name).into_iter().collect())
                }
            }
        }
        TargetSelector::ButtonGroup(group) => in_group(group, panel.button_group(group)),
        TargetSelector::ButtonLabel(label) => panel
            .button_by_label(label)
            .map(|(group, element)| in_group(&group, vec![element]))
            .unwrap_or_default(),
        TargetSelector::Ids(ids) => {
            let mut found = Vec::new();
            for id in ids {
                match panel.element(id) {
                    Some(element) => found.push(element),
                    None => warn!("Element '{}' not found", id),
                }
            }
            plain(found)
        }
        TargetSelector::DimmingFactors => {
            let root: ElementHandle = Arc::new(RootVars::new(panel.clone()));
            plain(vec![root])
        }
    };

    if targets.is_empty() {
        return Err(ResolveError::MissingTarget(selector.to_string()));
    }
    Ok(targets)
}

/// Final state of a button flicker: default-selected buttons gain the selected marker
fn final_button_state(state: &str, label: Option<&str>, group: Option<&str>) -> String {
    let has = |class: &str| state.split_whitespace().any(|c| c == class);
    let default_selected = match (label, group.and_then(default_selection)) {
        (Some(label), Some(selected)) => label == selected,
        _ => false,
    };
    if default_selected && !has(STATE_SELECTED) && !has(STATE_DIMLY_LIT) {
        format!("{} {}", state.trim(), STATE_SELECTED).trim().to_string()
    } else {
        state.trim().to_string()
    }
}

/// Flicker profile for a button ending in `state`
fn button_profile(state: &str, fast: bool) -> &'static str {
    let has = |class: &str| state.split_whitespace().any(|c| c == class);
    if has(STATE_DIMLY_LIT) {
        return "button-to-dimly-lit";
    }
    match (has(STATE_SELECTED), fast) {
        (true, false) => "button-to-lit-selected",
        (true, true) => "button-to-lit-selected-fast",
        (false, false) => "button-to-lit-unselected",
        (false, true) => "button-to-lit-unselected-fast",
    }
}

fn offset(start: f64, index: usize, stagger: f64) -> Position {
    Position::At(start + index as f64 * stagger.max(0.0))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseRunner {
    options: PlayOptions,
}

impl PhaseRunner {
    pub fn new(options: PlayOptions) -> Self {
        Self { options }
    }

    /// Assemble the master timeline of `config`
    pub fn build(&self, config: &Arc<PhaseConfig>, services: &Services) -> Result<Timeline, PhaseError> {
        self.assemble(config, services)
            .map_err(|source| PhaseError::Build {
                phase: config.phase,
                source,
            })
    }

    /// Build and play `config`, resolving when its timeline completes
    pub async fn run(&self, config: &Arc<PhaseConfig>, services: &Services) -> Result<(), PhaseError> {
        let tl = self.build(config, services)?;
        info!(
            "Playing phase {} '{}' ({:.2}s)",
            config.phase,
            config.name,
            tl.duration()
        );
        tl.play_with(self.options)
            .await
            .map_err(|source| PhaseError::Playback {
                phase: config.phase,
                source,
            })
    }

    fn assemble(&self, config: &Arc<PhaseConfig>, services: &Services) -> Result<Timeline, TimelineError> {
        let mut tl = Timeline::new();

        if let Some(cue) = &config.terminal {
            self.add_terminal_cue(&mut tl, cue, services)?;
        }

        for directive in &config.animations {
            debug!("Phase {}: adding {} directive", config.phase, directive.kind());
            self.add_directive(&mut tl, directive, config, services)?;
        }

        let natural = tl.duration();
        if natural < config.duration {
            debug!(
                "Phase {} padded from {:.2}s to {:.2}s",
                config.phase, natural, config.duration
            );
            tl.delay(config.duration - natural, natural)?;
        }
        Ok(tl)
    }

    fn add_terminal_cue(
        &self,
        tl: &mut Timeline,
        cue: &TerminalCue,
        services: &Services,
    ) -> Result<(), TimelineError> {
        let key = match cue {
            TerminalCue::Message { key } => key,
            TerminalCue::Flicker { key, profile } => {
                let screens = services.panel.elements(TERMINAL_GROUP);
                if screens.is_empty() {
                    warn!("No terminal screen for flicker cue '{}'", key);
                } else {
                    let effect = create_advanced_flicker(&screens, *profile, FlickerOptions::default())?;
                    tl.add(effect.into_timeline(), 0.0)?;
                }
                key
            }
        };

        let bus = services.bus().clone();
        let message = TerminalMessage::new(MessageKind::Startup, MESSAGE_SOURCE, key.as_str());
        tl.call(
            move || {
                bus.emit(AppEvent::TerminalMessageRequested(message));
                Ok(())
            },
            0.0,
        )?;
        Ok(())
    }

    fn add_directive(
        &self,
        tl: &mut Timeline,
        directive: &AnimationDirective,
        config: &Arc<PhaseConfig>,
        services: &Services,
    ) -> Result<(), TimelineError> {
        match directive {
            AnimationDirective::Tween {
                target,
                props,
                duration,
                ease,
                position,
                stagger,
            } => {
                let targets = match resolve_targets(target, services) {
                    Ok(targets) => targets,
                    Err(e) => {
                        warn!("Skipping tween in phase {}: {}", config.phase, e);
                        return Ok(());
                    }
                };
                let elements: Vec<ElementHandle> = targets.into_iter().map(|t| t.element).collect();
                if *stagger <= 0.0 {
                    tl.tween(
                        Tween::new(&elements, props.clone(), *duration).ease(*ease),
                        *position,
                    )?;
                } else {
                    let start = tl.resolve(*position)?;
                    for (i, element) in elements.into_iter().enumerate() {
                        tl.tween(
                            Tween::new(&[element], props.clone(), *duration).ease(*ease),
                            offset(start, i, *stagger),
                        )?;
                    }
                }
            }

            AnimationDirective::Flicker {
                target,
                state,
                profile,
                fast,
                stagger,
                position,
            } => {
                let targets = match resolve_targets(target, services) {
                    Ok(targets) => targets,
                    Err(e) => {
                        warn!("Skipping flicker in phase {}: {}", config.phase, e);
                        return Ok(());
                    }
                };
                let start = tl.resolve(*position)?;
                for (i, target) in targets.into_iter().enumerate() {
                    let label = target.element.label().map(str::to_string);
                    let final_state = state.as_deref().map(|s| match &label {
                        Some(label) => final_button_state(s, Some(label), target.group.as_deref()),
                        None => s.trim().to_string(),
                    });

                    let profile_name = match (profile, &label) {
                        (Some(name), _) => *name,
                        (None, Some(_)) => button_profile(final_state.as_deref().unwrap_or(""), *fast),
                        (None, None) => {
                            warn!(
                                "No flicker profile for '{}' in phase {}",
                                target.element.id(),
                                config.phase
                            );
                            continue;
                        }
                    };

                    let on_start = final_state.map(|state| -> Callback {
                        let element = target.element.clone();
                        Box::new(move || {
                            element.set_state(&state);
                            Ok(())
                        })
                    });
                    let effect = create_advanced_flicker(
                        &[target.element.clone()],
                        profile_name,
                        FlickerOptions {
                            on_start,
                            ..FlickerOptions::default()
                        },
                    )?;
                    tl.add(effect.into_timeline(), offset(start, i, *stagger))?;
                }
            }

            AnimationDirective::LcdPowerOn {
                target,
                stagger,
                position,
            } => {
                let targets = match resolve_targets(target, services) {
                    Ok(targets) => targets,
                    Err(e) => {
                        warn!("Skipping LCD power-on in phase {}: {}", config.phase, e);
                        return Ok(());
                    }
                };
                let start = tl.resolve(*position)?;
                for (i, target) in targets.into_iter().enumerate() {
                    let lcd = target.element;
                    let at = start + i as f64 * stagger.max(0.0);
                    let energized = lcd.clone();
                    let effect = create_advanced_flicker(
                        &[lcd.clone()],
                        LCD_POWER_ON_PROFILE,
                        FlickerOptions {
                            on_start: Some(Box::new(move || {
                                add_state(&energized, STATE_ENERGIZED);
                                Ok(())
                            })),
                            ..FlickerOptions::default()
                        },
                    )?;
                    let fade_at = at + effect.duration() * 0.5;

                    tl.set(&[lcd.clone()], Props::new().var(LCD_CONTENT_VAR, 0.0), at)?;
                    tl.add(effect.into_timeline(), at)?;
                    tl.tween(
                        Tween::new(&[lcd], Props::new().var(LCD_CONTENT_VAR, 1.0), LCD_CONTENT_FADE)
                            .ease(Ease::Power1Out),
                        fade_at,
                    )?;
                }
            }

            AnimationDirective::Call {
                call,
                deps,
                position,
            } => {
                let mut args: Vec<Resolved> = Vec::with_capacity(deps.len());
                for dependency in deps {
                    match services.resolve(*dependency, config) {
                        Ok(resolved) => args.push(resolved),
                        Err(e) => {
                            warn!(
                                "Skipping call '{}' in phase {}: {}",
                                call.name, config.phase, e
                            );
                            return Ok(());
                        }
                    }
                }
                let call = call.clone();
                tl.call(
                    move || {
                        if let Err(e) = call.invoke(&args) {
                            error!("Phase call '{}' failed: {:#}", call.name, e);
                        }
                        Ok(())
                    },
                    *position,
                )?;
            }

            AnimationDirective::LensEnergize { position } => match &services.lens {
                Some(lens) => {
                    tl.add(lens.energize()?, *position)?;
                }
                None => warn!("Skipping lens energize in phase {}: no lens", config.phase),
            },

            AnimationDirective::Audio { sound, position } => match &services.audio {
                Some(audio) => {
                    let audio = audio.clone();
                    let sound = sound.clone();
                    tl.call(
                        move || {
                            audio.play(&sound);
                            Ok(())
                        },
                        *position,
                    )?;
                }
                None => debug!("No audio player, dropping cue '{}'", sound),
            },
        }
        Ok(())
    }
}

/// [`PhaseExecutor`] playing the configured phases through a [`PhaseRunner`]
pub struct SequenceExecutor {
    runner: PhaseRunner,
    services: Services,
    phases: Vec<Arc<PhaseConfig>>,
}

impl SequenceExecutor {
    pub fn new(runner: PhaseRunner, services: Services, phases: Vec<Arc<PhaseConfig>>) -> Self {
        Self {
            runner,
            services,
            phases,
        }
    }

    fn config(&self, phase: PhaseId) -> Option<&Arc<PhaseConfig>> {
        self.phases.iter().find(|c| c.phase == phase.number())
    }
}

impl PhaseExecutor for SequenceExecutor {
    fn describe(&self, phase: PhaseId) -> PhaseDescriptor {
        match self.config(phase) {
            Some(config) => PhaseDescriptor {
                name: config.name.clone(),
                description: config.description.clone(),
            },
            None => PhaseDescriptor {
                name: phase.to_string(),
                description: String::new(),
            },
        }
    }

    fn execute(&self, phase: PhaseId) -> BoxFuture<'static, anyhow::Result<()>> {
        let config = self.config(phase).cloned();
        let runner = self.runner;
        let services = self.services.clone();
        Box::pin(async move {
            let config = config.ok_or_else(|| anyhow!("no configuration for {}", phase))?;
            runner.run(&config, &services).await?;
            Ok(())
        })
    }

    fn theme_transition_cleanup(&self) -> anyhow::Result<()> {
        self.services
            .store
            .set_theme(self.services.settings.interactive_theme);
        self.services.panel.set_root_var(STARTUP_OPACITY_VAR, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, Topic};
    use crate::panel::{AudioPlayer, HeadlessPanel, Panel, MAIN_POWER_GROUP};
    use crate::phases::{Dependency, PhaseCall};
    use crate::state::{AppStateStore, Theme};
    use crate::timeline::Property;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAudio(Mutex<Vec<String>>);

    impl AudioPlayer for RecordingAudio {
        fn play(&self, sound: &str) {
            self.0.lock().unwrap().push(sound.to_string());
        }
    }

    fn services() -> Services {
        let store = Arc::new(AppStateStore::new(EventBus::new()));
        Services::new(store, Arc::new(HeadlessPanel::standard()))
    }

    fn phase(duration: f64, animations: Vec<AnimationDirective>) -> Arc<PhaseConfig> {
        Arc::new(PhaseConfig {
            phase: 2,
            name: "Backup Power".into(),
            description: "test".into(),
            terminal: None,
            duration,
            animations,
        })
    }

    #[test]
    fn test_minimum_duration_is_enforced() {
        let config = phase(
            2.0,
            vec![AnimationDirective::Tween {
                target: TargetSelector::DimmingFactors,
                props: Props::new().opacity(1.0),
                duration: 0.3,
                ease: Ease::Linear,
                position: Position::At(0.0),
                stagger: 0.0,
            }],
        );
        let tl = PhaseRunner::default().build(&config, &services()).unwrap();
        assert!(tl.duration() >= 2.0);
    }

    #[test]
    fn test_longer_phase_is_not_padded() {
        let config = phase(
            0.5,
            vec![AnimationDirective::Tween {
                target: TargetSelector::named("lcds"),
                props: Props::new().opacity(1.0),
                duration: 0.4,
                ease: Ease::Linear,
                position: Position::At(0.0),
                stagger: 0.2,
            }],
        );
        let tl = PhaseRunner::default().build(&config, &services()).unwrap();
        assert!((tl.duration() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_unresolvable_directives_are_skipped() {
        let config = phase(
            1.0,
            vec![
                AnimationDirective::Flicker {
                    target: TargetSelector::button_group("warp-drive"),
                    state: Some(STATE_ENERGIZED.into()),
                    profile: None,
                    fast: false,
                    stagger: 0.1,
                    position: Position::At(0.0),
                },
                AnimationDirective::Tween {
                    target: TargetSelector::Ids(vec!["nope".into()]),
                    props: Props::new().opacity(1.0),
                    duration: 5.0,
                    ease: Ease::Linear,
                    position: Position::At(0.0),
                    stagger: 0.0,
                },
                AnimationDirective::Call {
                    call: PhaseCall::new("needsAudio", |_| Ok(())),
                    deps: vec![Dependency::Audio],
                    position: Position::At(0.0),
                },
                AnimationDirective::Flicker {
                    target: TargetSelector::named("lens"),
                    state: None,
                    profile: None,
                    fast: false,
                    stagger: 0.0,
                    position: Position::At(0.0),
                },
                AnimationDirective::LensEnergize {
                    position: Position::At(0.0),
                },
            ],
        );
        let tl = PhaseRunner::default().build(&config, &services()).unwrap();
        assert!((tl.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_position_fails_the_build() {
        let config = phase(
            1.0,
            vec![AnimationDirective::Tween {
                target: TargetSelector::DimmingFactors,
                props: Props::new().opacity(1.0),
                duration: 0.3,
                ease: Ease::Linear,
                position: Position::Relative(-5.0),
                stagger: 0.0,
            }],
        );
        let err = PhaseRunner::default().build(&config, &services()).unwrap_err();
        assert!(matches!(err, PhaseError::Build { phase: 2, .. }));
    }

    #[test]
    fn test_button_profile_selection() {
        let on = final_button_state(STATE_ENERGIZED, Some("ON"), Some(MAIN_POWER_GROUP));
        assert_eq!(on, "is-energized is-selected");
        assert_eq!(button_profile(&on, false), "button-to-lit-selected");
        assert_eq!(button_profile(&on, true), "button-to-lit-selected-fast");

        let off = final_button_state(STATE_ENERGIZED, Some("OFF"), Some(MAIN_POWER_GROUP));
        assert_eq!(off, "is-energized");
        assert_eq!(button_profile(&off, false), "button-to-lit-unselected");

        let dim = final_button_state(STATE_DIMLY_LIT, Some("ON"), Some(MAIN_POWER_GROUP));
        assert_eq!(dim, "is-dimly-lit");
        assert_eq!(button_profile(&dim, true), "button-to-dimly-lit");
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_plays_every_directive_kind() {
        let audio = Arc::new(RecordingAudio::default());
        let services = services().with_audio(audio.clone());
        let panel = services.panel.clone();

        let messages = Arc::new(Mutex::new(Vec::new()));
        let m = messages.clone();
        services.bus().subscribe(Topic::TerminalMessageRequested, move |event| {
            if let AppEvent::TerminalMessageRequested(message) = event {
                m.lock().unwrap().push(message.message_key.clone());
            }
            Ok(())
        });

        let seen_phase = Arc::new(Mutex::new(None));
        let seen = seen_phase.clone();
        let config = Arc::new(PhaseConfig {
            phase: 6,
            name: "Mood And Intensity".into(),
            description: String::new(),
            terminal: Some(TerminalCue::Message {
                key: "startupMoodIntensity".into(),
            }),
            duration: 0.5,
            animations: vec![
                AnimationDirective::Flicker {
                    target: TargetSelector::button_group(MAIN_POWER_GROUP),
                    state: Some(STATE_ENERGIZED.into()),
                    profile: None,
                    fast: false,
                    stagger: 0.1,
                    position: Position::At(0.0),
                },
                AnimationDirective::LcdPowerOn {
                    target: TargetSelector::named("lcds"),
                    stagger: 0.05,
                    position: Position::At(0.1),
                },
                AnimationDirective::Call {
                    call: PhaseCall::new("applyTheme", move |args| {
                        let phase = args[0].phase().ok_or_else(|| anyhow!("no phase"))?;
                        let store = args[1].store().ok_or_else(|| anyhow!("no store"))?;
                        *seen.lock().unwrap() = Some(phase.phase);
                        store.set_theme(Theme::Light);
                        Ok(())
                    }),
                    deps: vec![Dependency::Phase, Dependency::Store],
                    position: Position::after_previous(),
                },
                AnimationDirective::Audio {
                    sound: "lcdPowerOn".into(),
                    position: Position::At(0.1),
                },
            ],
        });

        PhaseRunner::default().run(&config, &services).await.unwrap();

        let on = panel.button_by_label("ON").unwrap().1;
        let off = panel.button_by_label("OFF").unwrap().1;
        assert_eq!(on.state(), "is-energized is-selected");
        assert_eq!(off.state(), "is-energized");
        for lcd in panel.elements("lcds") {
            assert_eq!(lcd.state(), STATE_ENERGIZED);
            assert_eq!(lcd.get(&Property::var(LCD_CONTENT_VAR)), Some(1.0));
            assert!((lcd.get(&Property::Opacity).unwrap() - 1.0).abs() < 1e-9);
        }
        assert_eq!(*seen_phase.lock().unwrap(), Some(6));
        assert_eq!(services.store.theme(), Theme::Light);
        assert_eq!(*audio.0.lock().unwrap(), vec!["lcdPowerOn".to_string()]);
        assert_eq!(*messages.lock().unwrap(), vec!["startupMoodIntensity".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_flicker_cue_lights_screen() {
        let services = services();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let m = messages.clone();
        services.bus().subscribe(Topic::TerminalMessageRequested, move |event| {
            if let AppEvent::TerminalMessageRequested(message) = event {
                m.lock().unwrap().push(message.message_key.clone());
            }
            Ok(())
        });
        let config = Arc::new(PhaseConfig {
            terminal: Some(TerminalCue::Flicker {
                key: "startupTerminal".into(),
                profile: "terminal-screen",
            }),
            ..(*phase(0.1, Vec::new())).clone()
        });

        let tl = PhaseRunner::default().build(&config, &services).unwrap();
        // The flicker, not the minimum duration, sets the length
        assert!(tl.duration() > 0.1);
        PhaseRunner::default().run(&config, &services).await.unwrap();

        let screen = services.panel.elements(TERMINAL_GROUP).remove(0);
        assert!((screen.get(&Property::Opacity).unwrap() - 1.0).abs() < 1e-9);
        assert!(screen.get(&Property::var("--terminal-glow-opacity")).is_some());
        assert_eq!(*messages.lock().unwrap(), vec!["startupTerminal".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_label_selects_one_button() {
        let services = services();
        let panel = services.panel.clone();
        let config = phase(
            0.2,
            vec![
                AnimationDirective::Flicker {
                    target: TargetSelector::ButtonLabel("ON".into()),
                    state: Some(STATE_ENERGIZED.into()),
                    profile: None,
                    fast: true,
                    stagger: 0.0,
                    position: Position::At(0.0),
                },
                AnimationDirective::Flicker {
                    target: TargetSelector::ButtonLabel("STANDBY".into()),
                    state: Some(STATE_ENERGIZED.into()),
                    profile: None,
                    fast: true,
                    stagger: 0.0,
                    position: Position::At(0.0),
                },
            ],
        );

        PhaseRunner::default().run(&config, &services).await.unwrap();

        // The label resolves inside its group, so the default selection applies
        let on = panel.button_by_label("ON").unwrap().1;
        let off = panel.button_by_label("OFF").unwrap().1;
        assert_eq!(on.state(), "is-energized is-selected");
        assert_eq!(off.state(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_cleanup_applies_interactive_theme() {
        let services = services();
        let executor = SequenceExecutor::new(PhaseRunner::default(), services.clone(), Vec::new());
        executor.theme_transition_cleanup().unwrap();
        assert_eq!(services.store.theme(), Theme::Dark);
        assert_eq!(services.panel.root_var(STARTUP_OPACITY_VAR), Some(1.0));

        let missing = executor.execute(PhaseId::FIRST).await;
        assert!(missing.is_err());
    }
}
