//! Named flicker profiles

/// Glow co-animated with a flicker, written to two custom variables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlowParams {
    /// `None` means the glow has no defined starting opacity
    pub initial_opacity: Option<f64>,
    pub peak_opacity: f64,
    pub final_opacity: f64,
    pub initial_size: f64,
    pub peak_size: f64,
    pub final_size: f64,
    pub opacity_var: &'static str,
    pub size_var: &'static str,
    /// Scale the per-cycle glow with the cycle amplitude instead of using the peak
    pub scale_with_amplitude: bool,
}

/// Parameters of a light stuttering on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlickerProfile {
    pub num_cycles: u32,
    pub period_start: f64,
    pub period_end: f64,
    /// Fraction of each period spent lit
    pub on_duration_ratio: f64,
    pub amplitude_start: f64,
    pub amplitude_end: f64,
    pub glow: Option<GlowParams>,
}

const BUTTON_GLOW_OPACITY_VAR: &str = "--btn-glow-opacity";
const BUTTON_GLOW_SIZE_VAR: &str = "--btn-glow-size";

const BUTTON_TO_DIMLY_LIT: FlickerProfile = FlickerProfile {
    num_cycles: 3,
    period_start: 0.12,
    period_end: 0.06,
    on_duration_ratio: 0.5,
    amplitude_start: 0.0,
    amplitude_end: 0.6,
    glow: None,
};

const BUTTON_GLOW_SELECTED: GlowParams = GlowParams {
    initial_opacity: Some(0.0),
    peak_opacity: 0.9,
    final_opacity: 0.8,
    initial_size: 0.0,
    peak_size: 14.0,
    final_size: 10.0,
    opacity_var: BUTTON_GLOW_OPACITY_VAR,
    size_var: BUTTON_GLOW_SIZE_VAR,
    scale_with_amplitude: true,
};

const BUTTON_GLOW_UNSELECTED: GlowParams = GlowParams {
    initial_opacity: Some(0.0),
    peak_opacity: 0.4,
    final_opacity: 0.25,
    initial_size: 0.0,
    peak_size: 6.0,
    final_size: 4.0,
    opacity_var: BUTTON_GLOW_OPACITY_VAR,
    size_var: BUTTON_GLOW_SIZE_VAR,
    scale_with_amplitude: true,
};

const BUTTON_TO_LIT_SELECTED: FlickerProfile = FlickerProfile {
    num_cycles: 4,
    period_start: 0.16,
    period_end: 0.07,
    on_duration_ratio: 0.45,
    amplitude_start: 0.6,
    amplitude_end: 1.0,
    glow: Some(BUTTON_GLOW_SELECTED),
};

const BUTTON_TO_LIT_UNSELECTED: FlickerProfile = FlickerProfile {
    num_cycles: 3,
    period_start: 0.14,
    period_end: 0.07,
    on_duration_ratio: 0.45,
    amplitude_start: 0.6,
    amplitude_end: 0.85,
    glow: Some(BUTTON_GLOW_UNSELECTED),
};

const BUTTON_TO_LIT_SELECTED_FAST: FlickerProfile = FlickerProfile {
    num_cycles: 2,
    period_start: 0.08,
    period_end: 0.05,
    ..BUTTON_TO_LIT_SELECTED
};

const BUTTON_TO_LIT_UNSELECTED_FAST: FlickerProfile = FlickerProfile {
    num_cycles: 2,
    period_start: 0.07,
    period_end: 0.04,
    ..BUTTON_TO_LIT_UNSELECTED
};

const LCD_TO_DIMLY_LIT: FlickerProfile = FlickerProfile {
    num_cycles: 4,
    period_start: 0.2,
    period_end: 0.08,
    on_duration_ratio: 0.4,
    amplitude_start: 0.0,
    amplitude_end: 0.5,
    glow: None,
};

const LCD_TO_ON: FlickerProfile = FlickerProfile {
    num_cycles: 5,
    period_start: 0.18,
    period_end: 0.06,
    on_duration_ratio: 0.5,
    amplitude_start: 0.1,
    amplitude_end: 1.0,
    glow: Some(GlowParams {
        initial_opacity: None,
        peak_opacity: 0.7,
        final_opacity: 0.5,
        initial_size: 0.0,
        peak_size: 18.0,
        final_size: 12.0,
        opacity_var: "--lcd-glow-opacity",
        size_var: "--lcd-glow-size",
        scale_with_amplitude: false,
    }),
};

const TEXT_TO_DIMLY_LIT: FlickerProfile = FlickerProfile {
    num_cycles: 3,
    period_start: 0.1,
    period_end: 0.05,
    on_duration_ratio: 0.5,
    amplitude_start: 0.0,
    amplitude_end: 0.7,
    glow: None,
};

const TERMINAL_SCREEN: FlickerProfile = FlickerProfile {
    num_cycles: 6,
    period_start: 0.22,
    period_end: 0.05,
    on_duration_ratio: 0.35,
    amplitude_start: 0.0,
    amplitude_end: 1.0,
    glow: Some(GlowParams {
        initial_opacity: Some(0.0),
        peak_opacity: 0.6,
        final_opacity: 0.35,
        initial_size: 0.0,
        peak_size: 24.0,
        final_size: 16.0,
        opacity_var: "--terminal-glow-opacity",
        size_var: "--terminal-glow-size",
        scale_with_amplitude: true,
    }),
};

const RESISTIVE_SHUTDOWN_FLASH: FlickerProfile = FlickerProfile {
    num_cycles: 3,
    period_start: 0.1,
    period_end: 0.1,
    on_duration_ratio: 0.5,
    amplitude_start: 0.4,
    amplitude_end: 1.0,
    glow: Some(BUTTON_GLOW_SELECTED),
};

const RESISTIVE_SHUTDOWN_FLASH_STRONG: FlickerProfile = FlickerProfile {
    num_cycles: 6,
    period_start: 0.08,
    period_end: 0.05,
    on_duration_ratio: 0.6,
    amplitude_start: 0.3,
    amplitude_end: 1.0,
    glow: Some(GlowParams {
        peak_opacity: 1.0,
        peak_size: 20.0,
        scale_with_amplitude: false,
        ..BUTTON_GLOW_SELECTED
    }),
};

/// Names of every registered profile
pub const PROFILE_NAMES: &[&str] = &[
    "button-to-dimly-lit",
    "button-to-lit-selected",
    "button-to-lit-unselected",
    "button-to-lit-selected-fast",
    "button-to-lit-unselected-fast",
    "lcd-to-dimly-lit",
    "lcd-to-on",
    "text-to-dimly-lit",
    "terminal-screen",
    "resistive-shutdown-flash",
    "resistive-shutdown-flash-strong",
];

/// Look up a profile by name
pub fn profile(name: &str) -> Option<FlickerProfile> {
    let profile = match name {
        "button-to-dimly-lit" => BUTTON_TO_DIMLY_LIT,
        "button-to-lit-selected" => BUTTON_TO_LIT_SELECTED,
        "button-to-lit-unselected" => BUTTON_TO_LIT_UNSELECTED,
        "button-to-lit-selected-fast" => BUTTON_TO_LIT_SELECTED_FAST,
        "button-to-lit-unselected-fast" => BUTTON_TO_LIT_UNSELECTED_FAST,
        "lcd-to-dimly-lit" => LCD_TO_DIMLY_LIT,
        "lcd-to-on" => LCD_TO_ON,
        "text-to-dimly-lit" => TEXT_TO_DIMLY_LIT,
        "terminal-screen" => TERMINAL_SCREEN,
        "resistive-shutdown-flash" => RESISTIVE_SHUTDOWN_FLASH,
        "resistive-shutdown-flash-strong" => RESISTIVE_SHUTDOWN_FLASH_STRONG,
        _ => return None,
    };
    Some(profile)
}
