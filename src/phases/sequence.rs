//! The HUE 9000 startup sequence

use anyhow::Context;
use std::sync::Arc;

use super::config::{AnimationDirective, PhaseCall, PhaseConfig, TargetSelector, TerminalCue};
use super::services::{Dependency, Resolved};
use crate::events::{AppEvent, MessageKind, TerminalMessage};
use crate::panel::{assignment_group, MAIN_POWER_GROUP, STATE_DIMLY_LIT, STATE_ENERGIZED};
use crate::state::{DialId, TargetKey, HUE_ASSIGNMENT_TABLE};
use crate::timeline::{Ease, Position, Props};

/// Grid row every target starts on
const DEFAULT_ASSIGNMENT_ROW: usize = 7;

fn tween(
    target: TargetSelector,
    props: Props,
    duration: f64,
    ease: Ease,
    position: impl Into<Position>,
) -> AnimationDirective {
    AnimationDirective::Tween {
        target,
        props,
        duration,
        ease,
        position: position.into(),
        stagger: 0.0,
    }
}

fn button_flicker(
    group: &str,
    state: &str,
    fast: bool,
    stagger: f64,
    position: impl Into<Position>,
) -> AnimationDirective {
    AnimationDirective::Flicker {
        target: TargetSelector::button_group(group),
        state: Some(state.to_string()),
        profile: None,
        fast,
        stagger,
        position: position.into(),
    }
}

fn profile_flicker(
    target: TargetSelector,
    profile: &'static str,
    stagger: f64,
    position: impl Into<Position>,
) -> AnimationDirective {
    AnimationDirective::Flicker {
        target,
        state: None,
        profile: Some(profile),
        fast: false,
        stagger,
        position: position.into(),
    }
}

fn audio(sound: &str, position: impl Into<Position>) -> AnimationDirective {
    AnimationDirective::Audio {
        sound: sound.to_string(),
        position: position.into(),
    }
}

fn call(call: PhaseCall, deps: &[Dependency], position: impl Into<Position>) -> AnimationDirective {
    AnimationDirective::Call {
        call,
        deps: deps.to_vec(),
        position: position.into(),
    }
}

fn message(key: &str) -> Option<TerminalCue> {
    Some(TerminalCue::Message { key: key.to_string() })
}

/// Prints the phase description to the terminal
fn announce_phase() -> PhaseCall {
    PhaseCall::new("announcePhase", |args: &[Resolved]| {
        let phase = args.first().and_then(Resolved::phase).context("phase config missing")?;
        let bus = args.get(1).and_then(Resolved::bus).context("event bus missing")?;
        bus.emit(AppEvent::TerminalMessageRequested(
            TerminalMessage::new(MessageKind::Status, "StartupSequence", "phaseDescription")
                .with_content(phase.description.clone()),
        ));
        Ok(())
    })
}

fn initialize_dials() -> PhaseCall {
    PhaseCall::new("initializeDials", |args: &[Resolved]| {
        let dials = args.first().and_then(Resolved::dials).context("dial animator missing")?;
        let settings = args.get(1).and_then(Resolved::settings).context("settings missing")?;
        dials.animate_to(DialId::A, settings.dial_a_hue, 1.2)?;
        dials.animate_to(DialId::B, settings.dial_b_hue, 1.2)?;
        Ok(())
    })
}

fn apply_default_target_colors() -> PhaseCall {
    PhaseCall::new("applyDefaultTargetColors", |args: &[Resolved]| {
        let store = args.first().and_then(Resolved::store).context("app state missing")?;
        for target in TargetKey::ALL {
            store.set_target_color_properties(target, HUE_ASSIGNMENT_TABLE[DEFAULT_ASSIGNMENT_ROW]);
        }
        Ok(())
    })
}

fn apply_interactive_theme() -> PhaseCall {
    PhaseCall::new("applyInteractiveTheme", |args: &[Resolved]| {
        let store = args.first().and_then(Resolved::store).context("app state missing")?;
        let settings = args.get(1).and_then(Resolved::settings).context("settings missing")?;
        store.set_theme(settings.interactive_theme);
        Ok(())
    })
}

fn phase(
    number: u8,
    name: &str,
    description: &str,
    terminal: Option<TerminalCue>,
    duration: f64,
    animations: Vec<AnimationDirective>,
) -> Arc<PhaseConfig> {
    Arc::new(PhaseConfig {
        phase: number,
        name: name.to_string(),
        description: description.to_string(),
        terminal,
        duration,
        animations,
    })
}

/// The twelve startup phases, in order
pub fn startup_phases() -> Vec<Arc<PhaseConfig>> {
    let hue_groups: Vec<String> = TargetKey::ALL.into_iter().map(assignment_group).collect();

    vec![
        phase(
            0,
            "System Idle",
            "Core systems dormant, awaiting power",
            message("startupBoot"),
            1.0,
            vec![
                tween(TargetSelector::DimmingFactors, Props::new().opacity(0.0), 0.0, Ease::Linear, 0.0),
                tween(TargetSelector::named("panel-sections"), Props::new().opacity(0.15), 0.6, Ease::Power1Out, 0.2),
                call(announce_phase(), &[Dependency::Phase, Dependency::Bus], 0.4),
            ],
        ),
        phase(
            1,
            "Emergency Subsystems",
            "Emergency lighting and terminal online",
            Some(TerminalCue::Flicker {
                key: "startupEmergency".to_string(),
                profile: "terminal-screen",
            }),
            2.0,
            vec![
                button_flicker(MAIN_POWER_GROUP, STATE_DIMLY_LIT, false, 0.1, 0.4),
                audio("flickerToDim", 0.4),
            ],
        ),
        phase(
            2,
            "Backup Power",
            "Backup power routed to panel illumination",
            message("startupBackupPower"),
            1.5,
            vec![
                tween(TargetSelector::DimmingFactors, Props::new().opacity(0.35), 1.0, Ease::Power1InOut, 0.0),
                profile_flicker(TargetSelector::named("lcds"), "lcd-to-dimly-lit", 0.15, 0.2),
                button_flicker("auxiliary-light", STATE_DIMLY_LIT, false, 0.05, 0.3),
                button_flicker("skill-scan", STATE_DIMLY_LIT, false, 0.05, 0.35),
                button_flicker("fit-eval", STATE_DIMLY_LIT, false, 0.05, 0.4),
            ],
        ),
        phase(
            3,
            "Main Power",
            "Main power bus energized",
            message("startupMainPower"),
            2.0,
            vec![
                button_flicker(MAIN_POWER_GROUP, STATE_ENERGIZED, false, 0.12, 0.0),
                tween(TargetSelector::DimmingFactors, Props::new().opacity(0.7), 1.2, Ease::Power1InOut, 0.2),
                audio("itemAppear", 0.1),
            ],
        ),
        phase(
            4,
            "Optical Core",
            "Optical core lens energizing",
            message("startupOpticalCore"),
            2.5,
            vec![
                audio("lensStartup", 0.2),
                AnimationDirective::LensEnergize {
                    position: Position::At(0.2),
                },
                profile_flicker(TargetSelector::named("logo"), "text-to-dimly-lit", 0.0, Position::after_previous()),
            ],
        ),
        phase(
            5,
            "Subsystem Diagnostics",
            "Running skill and fitness diagnostics",
            message("startupDiagnostics"),
            2.0,
            vec![
                button_flicker("skill-scan", STATE_ENERGIZED, true, 0.08, 0.0),
                button_flicker("fit-eval", STATE_ENERGIZED, true, 0.08, 0.3),
                audio("itemAppear", 0.3),
            ],
        ),
        phase(
            6,
            "Mood And Intensity",
            "Mood matrix and intensity controls online",
            message("startupMoodIntensity"),
            2.0,
            vec![
                AnimationDirective::LcdPowerOn {
                    target: TargetSelector::named("lcds"),
                    stagger: 0.2,
                    position: Position::At(0.0),
                },
                profile_flicker(TargetSelector::named("mood-matrix"), "text-to-dimly-lit", 0.0, 0.3),
                call(initialize_dials(), &[Dependency::Dials, Dependency::Settings], 0.5),
                audio("lcdPowerOn", 0.0),
            ],
        ),
        phase(
            7,
            "Hue Assignment",
            "Hue assignment grid calibrating",
            message("startupHueAssignment"),
            2.5,
            vec![
                button_flicker(&hue_groups[0], STATE_ENERGIZED, true, 0.03, 0.2),
                button_flicker(&hue_groups[1], STATE_ENERGIZED, true, 0.03, 0.35),
                button_flicker(&hue_groups[2], STATE_ENERGIZED, true, 0.03, 0.5),
                button_flicker(&hue_groups[3], STATE_ENERGIZED, true, 0.03, 0.65),
                call(apply_default_target_colors(), &[Dependency::Store], 0.8),
            ],
        ),
        phase(
            8,
            "Auxiliary Lighting",
            "Auxiliary lighting and color chips online",
            message("startupAuxiliary"),
            1.5,
            vec![
                button_flicker("auxiliary-light", STATE_ENERGIZED, false, 0.1, 0.0),
                profile_flicker(TargetSelector::named("color-chips"), "text-to-dimly-lit", 0.05, 0.2),
            ],
        ),
        phase(
            9,
            "Theme Transition",
            "Transitioning to interactive theme",
            message("startupThemeTransition"),
            2.0,
            vec![
                tween(TargetSelector::DimmingFactors, Props::new().opacity(1.0), 1.5, Ease::SineInOut, 0.0),
                tween(TargetSelector::named("panel-sections"), Props::new().opacity(1.0), 1.5, Ease::SineInOut, 0.0),
                call(apply_interactive_theme(), &[Dependency::Store, Dependency::Settings], 0.75),
            ],
        ),
        phase(
            10,
            "Final Check",
            "Final systems check",
            message("startupFinalCheck"),
            1.5,
            vec![
                profile_flicker(TargetSelector::named("logo"), "lcd-to-on", 0.0, 0.0),
                audio("systemCheck", 0.2),
            ],
        ),
        phase(
            11,
            "System Ready",
            "HUE 9000 operational",
            message("startupSystemReady"),
            1.0,
            vec![
                audio("startupComplete", 0.0),
                call(announce_phase(), &[Dependency::Phase, Dependency::Bus], 0.2),
            ],
        ),
    ]
}
