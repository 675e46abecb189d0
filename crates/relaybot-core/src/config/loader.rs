//! Config loader — reads `~/.relaybot/config.json`, merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.relaybot/config.json`
//! 3. Environment variables `RELAYBOT_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{Config, MemoryBackendKind};

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `RELAYBOT_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `RELAYBOT_AGENTS__DEFAULTS__MODEL` → `agents.defaults.model`
/// - `RELAYBOT_AGENTS__DEFAULTS__MAX_TOKENS` → `agents.defaults.max_tokens`
/// - `RELAYBOT_AGENTS__DEFAULTS__TEMPERATURE` → `agents.defaults.temperature`
/// - `RELAYBOT_AGENTS__DEFAULTS__WORKSPACE` → `agents.defaults.workspace`
/// - `RELAYBOT_PROVIDERS__<NAME>__API_KEY` → `providers.<name>.api_key`
/// - `RELAYBOT_PROVIDERS__<NAME>__API_BASE` → `providers.<name>.api_base`
/// - `RELAYBOT_MEMORY__BACKEND` → `memory.backend` (`"file"` | `"postgres"`)
/// - `RELAYBOT_MEMORY__POSTGRES__DSN` → `memory.postgres.dsn`
/// - `RELAYBOT_MEMORY__EMBEDDING__KEY` → `memory.embedding.key`
/// - `RELAYBOT_MEMORY__EMBEDDING__MODEL` → `memory.embedding.model`
/// - `RELAYBOT_GATEWAY__HOST` → `gateway.host`
/// - `RELAYBOT_GATEWAY__PORT` → `gateway.port`
/// - `RELAYBOT_GATEWAY__API_KEYS` → `gateway.api_keys` (comma-separated)
fn apply_env_overrides(mut config: Config) -> Config {
    // Agent defaults
    if let Ok(val) = std::env::var("RELAYBOT_AGENTS__DEFAULTS__MODEL") {
        config.agents.defaults.model = val;
    }
    if let Ok(val) = std::env::var("RELAYBOT_AGENTS__DEFAULTS__MAX_TOKENS") {
        if let Ok(n) = val.parse::<u32>() {
            config.agents.defaults.max_tokens = n;
        }
    }
    if let Ok(val) = std::env::var("RELAYBOT_AGENTS__DEFAULTS__TEMPERATURE") {
        if let Ok(t) = val.parse::<f64>() {
            config.agents.defaults.temperature = t;
        }
    }
    if let Ok(val) = std::env::var("RELAYBOT_AGENTS__DEFAULTS__WORKSPACE") {
        config.agents.defaults.workspace = val;
    }

    // Provider API keys (by provider name)
    apply_provider_env(&mut config.providers.anthropic, "ANTHROPIC");
    apply_provider_env(&mut config.providers.openai, "OPENAI");
    apply_provider_env(&mut config.providers.openrouter, "OPENROUTER");
    apply_provider_env(&mut config.providers.deepseek, "DEEPSEEK");
    apply_provider_env(&mut config.providers.groq, "GROQ");
    apply_provider_env(&mut config.providers.gemini, "GEMINI");

    // Memory
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__BACKEND") {
        config.memory.backend = match val.as_str() {
            "postgres" => MemoryBackendKind::Postgres,
            _ => MemoryBackendKind::File,
        };
    }
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__POSTGRES__DSN") {
        config.memory.postgres.dsn = val;
    }
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__POSTGRES__POOL_MAX_SIZE") {
        if let Ok(n) = val.parse::<u32>() {
            config.memory.postgres.pool_max_size = n;
        }
    }
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__EMBEDDING__KEY") {
        config.memory.embedding.key = val;
    }
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__EMBEDDING__MODEL") {
        config.memory.embedding.model = val;
    }
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__EMBEDDING__BASE_URL") {
        config.memory.embedding.base_url = Some(val);
    }
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__SEMANTIC_SEARCH_LIMIT") {
        if let Ok(n) = val.parse::<u32>() {
            config.memory.semantic_search_limit = n;
        }
    }
    if let Ok(val) = std::env::var("RELAYBOT_MEMORY__AUTO_INGEST") {
        config.memory.auto_ingest = val == "true" || val == "1";
    }

    // Gateway
    if let Ok(val) = std::env::var("RELAYBOT_GATEWAY__HOST") {
        config.gateway.host = val;
    }
    if let Ok(val) = std::env::var("RELAYBOT_GATEWAY__PORT") {
        if let Ok(p) = val.parse::<u16>() {
            config.gateway.port = p;
        }
    }
    if let Ok(val) = std::env::var("RELAYBOT_GATEWAY__API_KEYS") {
        config.gateway.api_keys = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(val) = std::env::var("RELAYBOT_GATEWAY__TIMEOUT") {
        if let Ok(t) = val.parse::<u64>() {
            config.gateway.timeout = t;
        }
    }
    if let Ok(val) = std::env::var("RELAYBOT_GATEWAY__MODEL_NAME") {
        config.gateway.model_name = val;
    }

    config
}

/// Apply env var overrides for a single provider.
fn apply_provider_env(provider: &mut super::schema::ProviderConfig, name: &str) {
    if let Ok(val) = std::env::var(format!("RELAYBOT_PROVIDERS__{name}__API_KEY")) {
        provider.api_key = val;
    }
    if let Ok(val) = std::env::var(format!("RELAYBOT_PROVIDERS__{name}__API_BASE")) {
        provider.api_base = Some(val);
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
