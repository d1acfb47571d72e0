//! Candidate API credentials.
//!
//! Sources, in priority order (all optional):
//!
//! | Key (TOML)             | Environment              | Notes                |
//! |------------------------|--------------------------|----------------------|
//! | `api_keys`             | `GEMINI_API_KEYS`        | comma-separated list |
//! | `api_key`              | `GEMINI_API_KEY`         |                      |
//! | `api_key1`..`api_key4` | `GEMINI_API_KEY1`..`4`   |                      |
//!
//! Candidates are trimmed, deduplicated keeping the first occurrence, and
//! anything of 20 characters or fewer is discarded.

use crate::error::SettingsError;
use config::{Config, Environment, File};
use log::debug;
use serde::Deserialize;
use std::collections::HashSet;

/// Keys this short are placeholders, not credentials.
pub const MIN_KEY_LEN: usize = 21;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialSources {
    pub api_keys: Option<String>,
    pub api_key: Option<String>,
    pub api_key1: Option<String>,
    pub api_key2: Option<String>,
    pub api_key3: Option<String>,
    pub api_key4: Option<String>,
}

impl CredentialSources {
    /// Load from an optional TOML file overlaid with `GEMINI_*` variables.
    pub fn load(file: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let sources = builder
            .add_source(Environment::with_prefix("GEMINI"))
            .build()?
            .try_deserialize::<CredentialSources>()?;
        Ok(sources)
    }

    /// Ordered, validated candidate list.
    pub fn candidates(&self) -> Vec<String> {
        let list = self
            .api_keys
            .as_deref()
            .map(|s| s.split(',').collect::<Vec<_>>())
            .unwrap_or_default();
        let singles = [
            &self.api_key,
            &self.api_key1,
            &self.api_key2,
            &self.api_key3,
            &self.api_key4,
        ];
        let keys = parse_candidates(
            list.into_iter()
                .chain(singles.into_iter().filter_map(|k| k.as_deref())),
        );
        debug!("Loaded {} credential candidate(s)", keys.len());
        keys
    }
}

pub fn parse_candidates<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(str::trim)
        .filter(|k| k.len() >= MIN_KEY_LEN)
        .filter(|k| seen.insert(k.to_string()))
        .map(str::to_string)
        .collect()
}

/// Does a close reason say the credential was refused?
pub fn is_credential_rejection(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains("api key")
}

/// Last four characters only, for logs.
pub fn redact(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{}", tail)
}
