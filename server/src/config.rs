/*
 * Copyright 2023 Oxide Computer Company
 */

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigFile {
    pub bind: ConfigBind,
    pub services: ConfigServices,
    pub storage: ConfigStorage,
    pub token: ConfigToken,
    pub cache: ConfigCache,
    pub approval: ConfigApproval,
    pub activity: ConfigActivity,
    pub scratch: ConfigScratch,
    pub zones: ConfigZones,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigBind {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigServices {
    pub dataops: String,
    pub dataset: String,
    pub metadata: String,
    pub project: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigStorage {
    pub internal_endpoint: String,
    pub internal_https: bool,
    pub public_endpoint: String,
    pub public_https: bool,
    pub access_key: String,
    pub secret_key: String,
    pub bucket_prefix_green: String,
    pub bucket_prefix_core: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigToken {
    pub secret: String,
    /**
     * Token lifetime, expressed in minutes to match the upstream service's
     * `DOWNLOAD_TOKEN_EXPIRE_AT` (seconds) once divided by 60.
     */
    pub expiry_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigCache {
    pub redis_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigApproval {
    pub database_url: String,
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigActivity {
    pub brokers: String,
    pub item_topic: String,
    pub dataset_topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigScratch {
    pub root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigZones {
    pub green_label: String,
    pub core_label: String,
}

/**
 * Overlay environment variables onto a parsed TOML tree before it is
 * deserialized into `ConfigFile`, matching `original_source`'s pydantic
 * `Settings` picking up an env var of the same name. Since this config is
 * nested (unlike the upstream flat settings object), the env var name is
 * the dotted path joined with `_` and uppercased, e.g. `storage.access_key`
 * becomes `STORAGE_ACCESS_KEY`.
 */
fn apply_env_overrides(path: &str, value: &mut toml::Value) {
    if let toml::Value::Table(table) = value {
        for (k, v) in table.iter_mut() {
            let child = if path.is_empty() { k.clone() } else { format!("{path}_{k}") };
            apply_env_overrides(&child, v);
        }
        return;
    }

    let var = path.to_uppercase();
    let Ok(raw) = std::env::var(&var) else { return };

    *value = match value {
        toml::Value::Boolean(_) => toml::Value::Boolean(raw.parse().unwrap_or_default()),
        toml::Value::Integer(_) => toml::Value::Integer(raw.parse().unwrap_or_default()),
        _ => toml::Value::String(raw),
    };
}

pub(crate) fn load(p: &str) -> Result<ConfigFile> {
    let s = std::fs::read_to_string(p)?;
    let mut value: toml::Value = toml::from_str(&s)?;
    apply_env_overrides("", &mut value);
    Ok(value.try_into()?)
}
