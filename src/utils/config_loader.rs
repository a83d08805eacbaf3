use dotenvy::dotenv;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::env;
use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),
    #[error("Error loading config: {0}")]
    ConfigError(String),
}

/// Read a TOML file, expanding `${VAR}` references from the environment (and `.env`).
pub async fn load_from_file<T: DeserializeOwned>(file_name: impl AsRef<Path>) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = tokio::fs::read_to_string(file_name).await?;
    parse_config(&contents)
}

pub fn parse_config<T: DeserializeOwned>(raw_config: &str) -> Result<T, LoadConfigError> {
    let contents = expand_vars(raw_config)?;
    Ok(toml::from_str(&contents)?)
}

/// Unset variables are left as written.
fn expand_vars(raw_config: &str) -> Result<String, LoadConfigError> {
    let re = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)\}")?;
    Ok(re
        .replace_all(raw_config, |caps: &Captures| match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => caps[0].to_string(),
        })
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Section {
        url: String,
        shards: usize,
    }

    #[test]
    fn test_expand_vars() {
        // SAFETY: the variable name is unique to this test
        unsafe { env::set_var("POOL_MIRROR_TEST_HOST", "node.example") };
        let expanded = expand_vars("url = \"wss://${POOL_MIRROR_TEST_HOST}/ws\"\nother = \"${POOL_MIRROR_UNSET_VAR}\"").unwrap();
        assert_eq!(expanded, "url = \"wss://node.example/ws\"\nother = \"${POOL_MIRROR_UNSET_VAR}\"");
    }

    #[test]
    fn test_parse_config() {
        let section: Section = parse_config("url = \"https://rpc.example\"\nshards = 4").unwrap();
        assert_eq!(section.url, "https://rpc.example");
        assert_eq!(section.shards, 4);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result: Result<Section, _> = load_from_file("/nonexistent/pool-mirror.toml").await;
        assert!(matches!(result, Err(LoadConfigError::IoError(_))));
    }
}
