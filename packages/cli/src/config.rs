use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

fn default_data_retention_secs() -> u64 {
    30 * 24 * 3600
}

fn default_fail_open() -> bool {
    true
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub(crate) struct AuthConfig {
    pub(crate) username: String,
    pub(crate) password: String,
}

/// A product known to the ACS; devices only register under a configured
/// product.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub(crate) struct ProductConfig {
    pub(crate) oui: String,
    pub(crate) product_class: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) schema: String,
    /// Uploads older than this many seconds are accepted and dropped.
    #[serde(default = "default_data_retention_secs")]
    pub(crate) data_retention_secs: u64,
    /// Whether a DNS failure still lets connection requests through.
    #[serde(default = "default_fail_open")]
    pub(crate) lan_check_fail_open: bool,
    /// HTTP Basic credentials; absent means no authentication.
    #[serde(default)]
    pub(crate) auth: Option<AuthConfig>,
    #[serde(default)]
    pub(crate) products: Vec<ProductConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: String::new(),
            data_retention_secs: default_data_retention_secs(),
            lan_check_fail_open: default_fail_open(),
            auth: None,
            products: Vec::new(),
        }
    }
}

impl Config {
    pub(crate) async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_apply_to_sparse_configs() {
        let config: Config =
            serde_json::from_str(r#"{"products": [{"oui": "000000", "product_class": "enb"}]}"#)
                .unwrap();
        assert_eq!(config.schema, "");
        assert_eq!(config.data_retention_secs, 30 * 24 * 3600);
        assert!(config.lan_check_fail_open);
        assert!(config.auth.is_none());
        assert_eq!(config.products.len(), 1);
    }
}
