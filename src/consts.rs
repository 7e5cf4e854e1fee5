//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Longest prompt accepted at submission, in characters.
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// Single max-tokens ceiling. Submission rejects overrides above it and the
/// provider clamps anything else down to it.
pub const MAX_TOKENS_CEILING: u32 = 4_000;

pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Fallbacks used when the settings table has no usable value.
pub const DEFAULT_MAX_TOKENS: u32 = 1_000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

// Setting keys.
pub const SETTING_DEFAULT_MAX_TOKENS: &str = "DefaultAITaskMaxTokens";
pub const SETTING_DEFAULT_TEMPERATURE: &str = "DefaultAITaskTemperature";
pub const SETTING_DEFAULT_MODEL: &str = "DefaultAIModelIdentifier";
pub const SETTING_USE_MOCK: &str = "UseMockAIService";
pub const SETTING_DEFAULT_API_KEY: &str = "OpenAIApiKey_Default_Encrypted";

/// Fragments that mark an API key as a seeded placeholder rather than a real key.
pub const API_KEY_PLACEHOLDERS: &[&str] = &["placeholder", "YOUR_"];

/// Environment variable holding the passphrase for encrypted settings.
pub const SECRET_KEY_ENV: &str = "PROMPTRELAY_SECRET_KEY";

/// Default database path: `~/.promptrelay/relay.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".promptrelay")
        .join("relay.db")
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
