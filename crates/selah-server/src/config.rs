use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A bearer token seeded at startup, for deployments where token
/// issuance happens out of band
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSeed {
    pub token: String,
    pub user_id: String,
}

impl fmt::Debug for TokenSeed {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenSeed")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub seed_tokens: Vec<TokenSeed>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SELAH_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "SELAH_API_DATABASE",
            "selah-server.db",
        ));
        let seed_tokens = parse_seed_tokens(lookup("SELAH_API_SEED_TOKENS").as_deref())?;

        Ok(Self {
            bind_addr,
            database_path,
            seed_tokens,
        })
    }
}

fn value_or_default(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse `token=user,token2=user2` into seeds
fn parse_seed_tokens(raw: Option<&str>) -> Result<Vec<TokenSeed>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, user_id) = entry.split_once('=').ok_or_else(|| {
                ConfigError::Invalid(
                    "SELAH_API_SEED_TOKENS entries must be `token=user`".to_string(),
                )
            })?;
            if token.trim().is_empty() || user_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "SELAH_API_SEED_TOKENS entries must not be empty".to_string(),
                ));
            }
            Ok(TokenSeed {
                token: token.trim().to_string(),
                user_id: user_id.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_env() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, PathBuf::from("selah-server.db"));
        assert!(config.seed_tokens.is_empty());
    }

    #[test]
    fn test_seed_tokens_parse() {
        let config = AppConfig::from_lookup(|name| match name {
            "SELAH_API_SEED_TOKENS" => Some("abc=user-1, def=user-2".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.seed_tokens.len(), 2);
        assert_eq!(config.seed_tokens[0].token, "abc");
        assert_eq!(config.seed_tokens[1].user_id, "user-2");
    }

    #[test]
    fn test_seed_tokens_reject_malformed_entries() {
        let result = AppConfig::from_lookup(|name| match name {
            "SELAH_API_SEED_TOKENS" => Some("not-a-pair".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_token_seed_debug_redacts_token() {
        let seed = TokenSeed {
            token: "secret".to_string(),
            user_id: "user-1".to_string(),
        };
        let debug = format!("{seed:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
