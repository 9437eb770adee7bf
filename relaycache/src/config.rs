//! Server configuration shape (§6.3): a plain `serde::Deserialize` struct.
//! Core only defines the shape; parsing the TOML file is the CLI binary's
//! job (§10.3 — "core never parses config files").

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::strategy::StrategyConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:8080`.
    pub bind: String,

    /// Externally reachable base URL, used by strategies that must emit
    /// absolute URLs.
    pub url: String,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Exactly one backend block must be present (§6.3).
    pub backend: BackendConfig,

    /// Zero or more strategy blocks; an implicit `default "/api/v1/"` is
    /// always added by [`ServerConfig::strategies_with_default`].
    #[serde(default)]
    pub strategy: Vec<StrategyBlock>,
}

impl ServerConfig {
    /// Every configured strategy plus the always-on default (§4.8).
    pub fn strategies_with_default(&self) -> Vec<StrategyBlock> {
        let mut strategies = self.strategy.clone();
        if !strategies.iter().any(|s| s.name == "default") {
            strategies.push(StrategyBlock {
                name: "default".to_string(),
                url_prefix: "/api/v1/".to_string(),
                options: HashMap::new(),
            });
        }
        strategies
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyBlock {
    pub name: String,
    pub url_prefix: String,
    #[serde(flatten, default)]
    pub options: HashMap<String, String>,
}

impl From<StrategyBlock> for StrategyConfig {
    fn from(block: StrategyBlock) -> Self {
        StrategyConfig { url_prefix: block.url_prefix, options: block.options }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    /// Job scheduler worker count; `0` means "number of CPU cores".
    #[serde(default)]
    pub concurrency: usize,
}

/// Exactly one of these variants is selected per server (§6.3: "Selects
/// and configures exactly one cache backend").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Memory { limit_mb: u64, max_ttl: String },
    Disk { path: String, limit_mb: u64, max_ttl: String },
    Tiered { tiers: Vec<BackendConfig> },
    Remote { url: String, limit_mb: u64, max_ttl: String },
}

impl BackendConfig {
    pub fn parse_max_ttl(text: &str) -> Result<Duration, crate::error::CacheError> {
        crate::duration::parse_ttl(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercised via JSON rather than TOML here since core doesn't carry a
    // TOML parser (the CLI owns that, §10.3); serde's derive is
    // format-agnostic, so this validates the same `Deserialize` impl the
    // CLI's `toml::from_str` drives in practice.
    fn sample_config() -> serde_json::Value {
        serde_json::json!({
            "bind": "127.0.0.1:8080",
            "url": "http://127.0.0.1:8080",
            "backend": { "type": "memory", "limit_mb": 256, "max_ttl": "1h" },
        })
    }

    #[test]
    fn parses_a_minimal_memory_config() {
        let config: ServerConfig = serde_json::from_value(sample_config()).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.scheduler.concurrency, 0);
        match config.backend {
            BackendConfig::Memory { limit_mb, .. } => assert_eq!(limit_mb, 256),
            _ => panic!("expected memory backend"),
        }
    }

    #[test]
    fn default_strategy_is_always_present() {
        let config: ServerConfig = serde_json::from_value(sample_config()).unwrap();
        let strategies = config.strategies_with_default();
        assert!(strategies.iter().any(|s| s.name == "default" && s.url_prefix == "/api/v1/"));
    }
}
