use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub default_speed_mph: f64,
    pub provisional_id_prefix: String,
    pub profile_cache_ttl_hours: i64,
    /// How often the watchdog probes the server while the network is up but
    /// the server has not been confirmed reachable.
    pub reachability_interval_secs: u64,
    pub default_weight_kg: f64,
    /// Window in which a repeated read is answered from the request cache.
    pub request_dedup_secs: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            default_speed_mph: 3.0,
            provisional_id_prefix: "local-".into(),
            profile_cache_ttl_hours: 24,
            reachability_interval_secs: 15,
            default_weight_kg: 70.0,
            request_dedup_secs: 300,
        }
    }
}

impl SyncSettings {
    /// Apply `FASTNOW_SUPABASE_URL` / `FASTNOW_SUPABASE_ANON_KEY` on top of the
    /// file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("FASTNOW_SUPABASE_URL") {
            if !url.trim().is_empty() {
                self.supabase_url = Some(url.trim().trim_end_matches('/').to_string());
            }
        }
        if let Ok(key) = std::env::var("FASTNOW_SUPABASE_ANON_KEY") {
            if !key.trim().is_empty() {
                self.supabase_anon_key = Some(key.trim().to_string());
            }
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<SyncSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings at {}: {err}", path.display());
                SyncSettings::default()
            })
        } else {
            SyncSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Current settings with environment overrides applied.
    pub fn settings(&self) -> SyncSettings {
        let guard = match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().with_env_overrides()
    }

    pub fn update(&self, settings: SyncSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &SyncSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
