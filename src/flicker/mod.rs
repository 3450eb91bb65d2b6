//! Flicker and glow effect engine
//!
//! Synthesizes a timeline that makes a light stutter on: a series of on/off
//! cycles whose period shrinks and whose amplitude grows from the profile's
//! start to end values, followed by a settle onto the final brightness. An
//! optional glow (opacity and size custom variables) is co-animated with each
//! cycle. The engine only writes to the elements it is given.

pub mod profiles;

pub use profiles::{profile, FlickerProfile, GlowParams};

use tracing::warn;

use crate::timeline::{
    Callback, Ease, ElementHandle, PlayOptions, Playback, Props, Timeline, TimelineError, Tween,
};

/// Below this a start amplitude or glow opacity counts as unlit
const UNLIT_THRESHOLD: f64 = 0.01;
/// Shortest on or off segment, in seconds
const MIN_SEGMENT: f64 = 0.01;
/// Off segments drop to this fraction of the start amplitude
const OFF_LEVEL_FACTOR: f64 = 0.3;
/// The settle begins this fraction of the last on segment early
const SETTLE_OVERLAP_FACTOR: f64 = 0.3;
const MIN_SETTLE: f64 = 0.15;
const SETTLE_PERIOD_FACTOR: f64 = 1.5;
/// Length of the placeholder timeline for an unusable profile
const DEGRADED_DURATION: f64 = 0.01;

/// A profile given by name or inline
#[derive(Debug, Clone, Copy)]
pub enum ProfileRef<'a> {
    Named(&'a str),
    Inline(FlickerProfile),
}

impl<'a> From<&'a str> for ProfileRef<'a> {
    fn from(name: &'a str) -> Self {
        ProfileRef::Named(name)
    }
}

impl From<FlickerProfile> for ProfileRef<'_> {
    fn from(profile: FlickerProfile) -> Self {
        ProfileRef::Inline(profile)
    }
}

/// Per-call glow overrides; `None` keeps the profile value
#[derive(Debug, Clone, Copy, Default)]
pub struct GlowOverride {
    pub initial_opacity: Option<f64>,
    pub peak_opacity: Option<f64>,
    pub final_opacity: Option<f64>,
    pub initial_size: Option<f64>,
    pub peak_size: Option<f64>,
    pub final_size: Option<f64>,
}

impl GlowOverride {
    fn apply(&self, glow: GlowParams) -> GlowParams {
        GlowParams {
            initial_opacity: self.initial_opacity.or(glow.initial_opacity),
            peak_opacity: self.peak_opacity.unwrap_or(glow.peak_opacity),
            final_opacity: self.final_opacity.unwrap_or(glow.final_opacity),
            initial_size: self.initial_size.unwrap_or(glow.initial_size),
            peak_size: self.peak_size.unwrap_or(glow.peak_size),
            final_size: self.final_size.unwrap_or(glow.final_size),
            ..glow
        }
    }
}

#[derive(Default)]
pub struct FlickerOptions {
    /// Elements carrying the glow; defaults to the flicker targets
    pub light_targets: Option<Vec<ElementHandle>>,
    pub override_glow: Option<GlowOverride>,
    pub on_start: Option<Callback>,
    pub on_complete: Option<Callback>,
}

/// A synthesized flicker: compose it into a parent timeline, or play it
/// standalone and await completion
#[derive(Debug)]
pub struct FlickerEffect {
    timeline: Timeline,
}

impl FlickerEffect {
    fn degraded(on_start: Option<Callback>, on_complete: Option<Callback>) -> Self {
        let mut timeline = Timeline::new();
        // A fixed positive duration and a zero offset cannot fail to place
        if let Some(on_start) = on_start {
            let _ = timeline.call(on_start, 0.0);
        }
        let _ = timeline.delay(DEGRADED_DURATION, 0.0);
        if let Some(on_complete) = on_complete {
            timeline.on_complete(on_complete);
        }
        Self { timeline }
    }

    pub fn duration(&self) -> f64 {
        self.timeline.duration()
    }

    pub fn into_timeline(self) -> Timeline {
        self.timeline
    }

    pub fn play(self, options: PlayOptions) -> Playback {
        self.timeline.play_with(options)
    }
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

fn is_finite(profile: &FlickerProfile) -> bool {
    let base = [
        profile.period_start,
        profile.period_end,
        profile.on_duration_ratio,
        profile.amplitude_start,
        profile.amplitude_end,
    ];
    let glow = profile.glow.map_or(Vec::new(), |g| {
        vec![
            g.initial_opacity.unwrap_or(0.0),
            g.peak_opacity,
            g.final_opacity,
            g.initial_size,
            g.peak_size,
            g.final_size,
        ]
    });
    base.iter().chain(glow.iter()).all(|v| v.is_finite())
}

/// On and off lengths of cycle `index`
pub fn cycle_segments(profile: &FlickerProfile, index: u32) -> (f64, f64) {
    let progress = if profile.num_cycles <= 1 {
        1.0
    } else {
        f64::from(index) / f64::from(profile.num_cycles - 1)
    };
    let period = lerp(profile.period_start, profile.period_end, progress);
    let on = (period * profile.on_duration_ratio).max(MIN_SEGMENT);
    let off = (period - on).max(MIN_SEGMENT);
    (on, off)
}

/// Length of the final settle, excluding its early start
pub fn settle_duration(profile: &FlickerProfile) -> f64 {
    (profile.period_end * SETTLE_PERIOD_FACTOR).max(MIN_SETTLE)
}

/// Build the flicker timeline for `targets`.
///
/// An unknown or empty profile degrades to a near-zero timeline rather than
/// failing. Errors are only returned for non-finite profile values.
pub fn create_advanced_flicker<'a>(
    targets: &[ElementHandle],
    profile: impl Into<ProfileRef<'a>>,
    options: FlickerOptions,
) -> Result<FlickerEffect, TimelineError> {
    let profile = match profile.into() {
        ProfileRef::Named(name) => match profiles::profile(name) {
            Some(profile) => profile,
            None => {
                warn!("Unknown flicker profile '{}'", name);
                return Ok(FlickerEffect::degraded(options.on_start, options.on_complete));
            }
        },
        ProfileRef::Inline(profile) => profile,
    };
    if profile.num_cycles == 0 {
        warn!("Flicker profile has no cycles");
        return Ok(FlickerEffect::degraded(options.on_start, options.on_complete));
    }
    if !is_finite(&profile) {
        return Err(TimelineError::InvalidValue);
    }

    let glow = profile
        .glow
        .map(|glow| options.override_glow.unwrap_or_default().apply(glow));
    let light_targets = options.light_targets.unwrap_or_else(|| targets.to_vec());

    let mut tl = Timeline::new();
    if let Some(on_start) = options.on_start {
        tl.call(on_start, 0.0)?;
    }

    let unlit = profile.amplitude_start <= UNLIT_THRESHOLD
        && glow.map_or(true, |g| g.initial_opacity.map_or(true, |o| o <= UNLIT_THRESHOLD));
    let start_opacity = if unlit { 0.0 } else { profile.amplitude_start };
    tl.set(targets, Props::new().opacity(start_opacity), 0.0)?;

    let glow_rest_opacity = glow.map(|g| if unlit { 0.0 } else { g.initial_opacity.unwrap_or(0.0) });
    if let (Some(g), Some(rest)) = (glow, glow_rest_opacity) {
        tl.set(
            &light_targets,
            Props::new().var(g.opacity_var, rest).var(g.size_var, g.initial_size),
            0.0,
        )?;
    }

    let off_level = if profile.amplitude_start > 0.0 {
        profile.amplitude_start * OFF_LEVEL_FACTOR
    } else {
        0.0
    };

    let mut cursor = 0.0;
    let mut last_on = 0.0;
    for i in 0..profile.num_cycles {
        let progress = if profile.num_cycles == 1 {
            1.0
        } else {
            f64::from(i) / f64::from(profile.num_cycles - 1)
        };
        let amplitude = lerp(profile.amplitude_start, profile.amplitude_end, progress);
        let (on, off) = cycle_segments(&profile, i);
        let is_last = i + 1 == profile.num_cycles;

        tl.to(targets, Props::new().opacity(amplitude), on, cursor)?;
        if let (Some(g), Some(rest)) = (glow, glow_rest_opacity) {
            let scale = if g.scale_with_amplitude && profile.amplitude_end > 0.0 {
                (amplitude / profile.amplitude_end).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let props = Props::new()
                .var(g.opacity_var, lerp(rest, g.peak_opacity, scale))
                .var(g.size_var, lerp(g.initial_size, g.peak_size, scale));
            tl.to(&light_targets, props, on, cursor)?;
        }

        if !is_last {
            tl.to(targets, Props::new().opacity(off_level), off, cursor + on)?;
            if let (Some(g), Some(rest)) = (glow, glow_rest_opacity) {
                let props = Props::new()
                    .var(g.opacity_var, rest)
                    .var(g.size_var, g.initial_size);
                tl.to(&light_targets, props, off, cursor + on)?;
            }
        }

        cursor += on + off;
        last_on = on;
    }

    // The settle starts early by part of the last on segment and is lengthened
    // by the same amount, so it always ends `settle` after the cycle window.
    let overlap = last_on * SETTLE_OVERLAP_FACTOR;
    let settle_start = cursor - overlap;
    let settle = settle_duration(&profile) + overlap;
    tl.tween(
        Tween::new(targets, Props::new().opacity(profile.amplitude_end), settle).ease(Ease::Power1Out),
        settle_start,
    )?;
    if let Some(g) = glow {
        let props = Props::new()
            .var(g.opacity_var, g.final_opacity)
            .var(g.size_var, g.final_size);
        tl.tween(
            Tween::new(&light_targets, props, settle).ease(Ease::Power1Out),
            settle_start,
        )?;
    }

    if let Some(on_complete) = options.on_complete {
        tl.on_complete(on_complete);
    }
    if tl.duration() <= 0.0 {
        tl.delay(DEGRADED_DURATION, 0.0)?;
    }

    Ok(FlickerEffect { timeline: tl })
}
