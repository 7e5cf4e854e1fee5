//! Effective generation parameters for a task.
//!
//! Precedence is task override, then model default, then the application
//! default read from settings.

use serde::Serialize;

use crate::consts::{
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, MAX_TEMPERATURE, MIN_TEMPERATURE,
    SETTING_DEFAULT_MAX_TOKENS, SETTING_DEFAULT_TEMPERATURE,
};
use crate::models::ModelConfig;
use crate::settings::SettingsService;

/// Application-wide fallbacks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterDefaults {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for ParameterDefaults {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl ParameterDefaults {
    /// Read the defaults from settings. Missing or nonsensical values fall back
    /// to the built-in constants.
    pub fn from_settings(settings: &SettingsService) -> Self {
        let max_tokens = settings.get_int(SETTING_DEFAULT_MAX_TOKENS, DEFAULT_MAX_TOKENS as i64);
        let max_tokens = u32::try_from(max_tokens)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let temperature = settings.get_real(SETTING_DEFAULT_TEMPERATURE, DEFAULT_TEMPERATURE);
        Self {
            max_tokens,
            temperature: clamp_temperature(temperature),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Parameters {
    /// Not yet clamped to the provider ceiling.
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Resolve the parameters for one call.
pub fn resolve(
    task_max_tokens: Option<u32>,
    task_temperature: Option<f64>,
    model: &ModelConfig,
    defaults: &ParameterDefaults,
) -> Parameters {
    let max_tokens = task_max_tokens
        .filter(|&n| n > 0)
        .or(model.default_max_tokens.filter(|&n| n > 0))
        .unwrap_or(defaults.max_tokens);
    let temperature = task_temperature
        .or(model.default_temperature)
        .unwrap_or(defaults.temperature);
    Parameters {
        max_tokens,
        temperature: clamp_temperature(temperature),
    }
}

/// Clamp into `[0, 2]`; NaN becomes the default.
pub fn clamp_temperature(temperature: f64) -> f64 {
    if temperature.is_nan() {
        return DEFAULT_TEMPERATURE;
    }
    temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}
