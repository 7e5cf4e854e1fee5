//! Typed access to the settings table.
//!
//! Non-sensitive values are cached for a short while; sensitive values are
//! never cached and only come back through [`SettingsService::get_decrypted`].

pub mod secret;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::consts::{
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, SETTING_DEFAULT_API_KEY, SETTING_DEFAULT_MAX_TOKENS,
    SETTING_DEFAULT_MODEL, SETTING_DEFAULT_TEMPERATURE, SETTING_USE_MOCK,
};
use crate::models::{Setting, SettingType};
use crate::store::SettingStore;
use secret::{Cipher, SecretResolver};

/// How long a cached non-sensitive value stays fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Values an admin form submits to mean "leave the stored secret alone".
const UNCHANGED_MARKERS: [&str; 2] = ["********", "[ENCRYPTED]"];

pub struct SettingsService {
    store: Arc<dyn SettingStore>,
    cipher: Arc<dyn Cipher>,
    ttl: Duration,
    cache: Mutex<HashMap<String, (String, Instant)>>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingStore>, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            store,
            cipher,
            ttl: CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Plain value of a non-sensitive setting. Sensitive settings read as absent.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        let cache_key = key.to_lowercase();
        if let Some((value, stored_at)) = self.cache.lock().unwrap().get(&cache_key)
            && stored_at.elapsed() < self.ttl
        {
            return Ok(Some(value.clone()));
        }

        let Some(setting) = self.store.get(key)? else {
            return Ok(None);
        };
        if setting.sensitive {
            return Ok(None);
        }
        if let Some(value) = &setting.value {
            self.cache
                .lock()
                .unwrap()
                .insert(cache_key, (value.clone(), Instant::now()));
        }
        Ok(setting.value)
    }

    /// Value of any setting, decrypting it when it is stored encrypted.
    ///
    /// A value that fails to decrypt reads as absent.
    pub fn get_decrypted(&self, key: &str) -> Result<Option<String>> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        let Some(setting) = self.store.get(key)? else {
            return Ok(None);
        };
        match setting.value {
            Some(value) if setting.is_encrypted() && !value.is_empty() => {
                match self.cipher.decrypt(&value) {
                    Ok(plain) => Ok(Some(plain)),
                    Err(e) => {
                        warn!(key, error = %e, "failed to decrypt setting");
                        Ok(None)
                    }
                }
            }
            value => Ok(value),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.read(key)
            .and_then(|value| parse_bool(&value))
            .unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.read(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_real(&self, key: &str, default: f64) -> f64 {
        self.read(key)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(default)
    }

    /// Insert or update a setting.
    ///
    /// Sensitive `EncryptedString` values are encrypted before they are
    /// written. Submitting one of the masked markers keeps whatever secret is
    /// already stored.
    pub fn save(&self, mut setting: Setting) -> Result<()> {
        setting.key = setting.key.trim().to_string();
        if setting.key.is_empty() {
            anyhow::bail!("setting key is required");
        }
        let existing = self.store.get(&setting.key)?;

        if setting.is_encrypted() {
            match setting.value.as_deref() {
                Some(value) if UNCHANGED_MARKERS.contains(&value) => {
                    setting.value = existing.as_ref().and_then(|s| s.value.clone());
                }
                Some(value) if !value.is_empty() => {
                    setting.value = Some(self.cipher.encrypt(value)?);
                }
                _ => {}
            }
        }

        self.store.upsert(&setting)?;
        self.invalidate(&setting.key);
        let action = if existing.is_some() { "updated" } else { "created" };
        info!(key = %setting.key, action, "setting saved");
        Ok(())
    }

    /// Store `plaintext` as a sensitive encrypted setting.
    pub fn set_secret(&self, key: &str, plaintext: &str, description: Option<&str>) -> Result<()> {
        self.save(Setting {
            key: key.to_string(),
            value: Some(plaintext.to_string()),
            description: description.map(str::to_string),
            data_type: SettingType::EncryptedString,
            sensitive: true,
            group: Some("AI".to_string()),
        })
    }

    /// Every setting, with sensitive values masked.
    pub fn all(&self) -> Result<Vec<Setting>> {
        let mut settings = self.store.all()?;
        for setting in settings.iter_mut().filter(|s| s.sensitive) {
            if setting.value.as_deref().is_some_and(|v| !v.is_empty()) {
                setting.value = Some(UNCHANGED_MARKERS[0].to_string());
            }
        }
        Ok(settings)
    }

    /// Populate an empty settings table with the defaults the relay needs.
    ///
    /// Returns `true` when anything was written.
    pub fn seed_defaults(&self) -> Result<bool> {
        if !self.store.all()?.is_empty() {
            return Ok(false);
        }
        let max_tokens = DEFAULT_MAX_TOKENS.to_string();
        let temperature = DEFAULT_TEMPERATURE.to_string();
        let defaults = [
            (
                SETTING_DEFAULT_API_KEY,
                "YOUR_OPENAI_API_KEY_HERE",
                "Default API key for the text-generation provider",
                SettingType::EncryptedString,
                true,
            ),
            (
                SETTING_DEFAULT_MODEL,
                "gpt-3.5-turbo",
                "Model identifier used when none is chosen",
                SettingType::String,
                false,
            ),
            (
                SETTING_DEFAULT_MAX_TOKENS,
                max_tokens.as_str(),
                "Default max tokens for a task",
                SettingType::Integer,
                false,
            ),
            (
                SETTING_DEFAULT_TEMPERATURE,
                temperature.as_str(),
                "Default sampling temperature for a task",
                SettingType::Real,
                false,
            ),
            (
                SETTING_USE_MOCK,
                "true",
                "Use the built-in mock provider instead of calling the API",
                SettingType::Boolean,
                false,
            ),
        ];
        let count = defaults.len();
        for (key, value, description, data_type, sensitive) in defaults {
            self.save(Setting {
                key: key.to_string(),
                value: Some(value.to_string()),
                description: Some(description.to_string()),
                data_type,
                sensitive,
                group: Some("AI".to_string()),
            })?;
        }
        info!(count, "seeded default settings");
        Ok(true)
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.lock().unwrap().remove(&key.trim().to_lowercase());
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.get_value(key) {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(e) => {
                warn!(key, error = %e, "failed to read setting");
                None
            }
        }
    }
}

impl SecretResolver for SettingsService {
    fn resolve_secret(&self, key: &str) -> Option<String> {
        match self.get_decrypted(key) {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "secret lookup failed");
                None
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
