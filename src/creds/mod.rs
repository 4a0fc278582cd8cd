use crate::config::Config;
use crate::errors::{StallbotError, StallbotResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// Opaque session credential for one account. The engine never inspects the
/// contents; it only hands the token to the feed and API layers.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

/// Supplies per-account session tokens. Refresh/re-auth flows live outside
/// the engine; a `CredentialExpired` error pauses the account and surfaces a
/// re-auth observation.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_token(&self, account_id: &str) -> StallbotResult<Token>;
}

/// Credential store backed by the static config file. An account whose
/// configured credential is empty is treated as expired.
pub struct ConfigCredentialStore {
    tokens: HashMap<String, String>,
}

impl ConfigCredentialStore {
    pub fn from_config(config: &Config) -> Self {
        let tokens = config
            .accounts
            .iter()
            .map(|a| (a.id.clone(), a.credential.clone()))
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl CredentialStore for ConfigCredentialStore {
    async fn get_token(&self, account_id: &str) -> StallbotResult<Token> {
        match self.tokens.get(account_id) {
            Some(raw) if !raw.is_empty() => Ok(Token::new(raw.clone())),
            _ => Err(StallbotError::CredentialExpired(account_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;

    fn store() -> ConfigCredentialStore {
        ConfigCredentialStore::from_config(&Config {
            accounts: vec![
                AccountConfig {
                    id: "a1".into(),
                    label: String::new(),
                    enabled: true,
                    credential: "cookie".into(),
                },
                AccountConfig {
                    id: "a2".into(),
                    label: String::new(),
                    enabled: true,
                    credential: String::new(),
                },
            ],
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn test_token_for_known_account() {
        let token = store().get_token("a1").await.unwrap();
        assert_eq!(token.expose(), "cookie");
    }

    #[tokio::test]
    async fn test_empty_credential_is_expired() {
        let err = store().get_token("a2").await.unwrap_err();
        assert!(matches!(err, StallbotError::CredentialExpired(_)));
    }

    #[tokio::test]
    async fn test_unknown_account_is_expired() {
        let err = store().get_token("nope").await.unwrap_err();
        assert!(matches!(err, StallbotError::CredentialExpired(_)));
    }

    #[test]
    fn test_token_debug_redacted() {
        let token = Token::new("secret-cookie");
        assert_eq!(format!("{:?}", token), "Token([REDACTED])");
    }
}
