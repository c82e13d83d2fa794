//! Delegated credential exchange.
//!
//! The identity pool trusts ID tokens issued by the user pool. Exchanging a
//! token is two calls: `GetId` resolves the identity, then
//! `GetCredentialsForIdentity` returns short-lived credentials scoped to the
//! caller.

use crate::{
    config::{AppConfig, ConfigError},
    identity::{cognito::amz_json_call, ProviderError},
};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{debug, instrument};

pub const IDENTITY_POOL_TARGET: &str = "AWSCognitoIdentityService";

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("credential exchange is disabled")]
    Disabled,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("identity pool response has no {0}")]
    Missing(&'static str),
}

/// Short-lived credentials issued for one caller.
#[derive(Clone)]
pub struct DelegatedCredentials {
    pub identity_id: String,
    pub access_key_id: String,
    pub secret_key: SecretString,
    pub session_token: SecretString,
    pub expiration: Option<SystemTime>,
}

impl fmt::Debug for DelegatedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedCredentials")
            .field("identity_id", &self.identity_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &"***")
            .field("session_token", &"***")
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, id_token: &SecretString)
        -> Result<DelegatedCredentials, ExchangeError>;
}

/// Identity pool client.
pub struct IdentityPoolExchange {
    config: Arc<AppConfig>,
    http: Client,
}

impl IdentityPoolExchange {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Arc<AppConfig>) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .map_err(ProviderError::from)?;
        Ok(Self { config, http })
    }

    async fn call(&self, operation: &str, payload: &Value) -> Result<Value, ExchangeError> {
        let endpoint = self.config.identity_pool_endpoint()?;
        Ok(amz_json_call(
            &self.http,
            endpoint,
            &format!("{IDENTITY_POOL_TARGET}.{operation}"),
            payload,
        )
        .await?)
    }
}

#[async_trait]
impl CredentialExchange for IdentityPoolExchange {
    #[instrument(skip(self, id_token))]
    async fn exchange(
        &self,
        id_token: &SecretString,
    ) -> Result<DelegatedCredentials, ExchangeError> {
        let pool_id = self
            .config
            .identity_pool_id
            .as_deref()
            .ok_or(ConfigError::Missing("identity pool id"))?;
        let mut logins = serde_json::Map::new();
        logins.insert(
            self.config.identity_provider_name()?,
            Value::String(id_token.expose_secret().to_string()),
        );
        let logins = Value::Object(logins);

        let json = self
            .call(
                "GetId",
                &json!({ "IdentityPoolId": pool_id, "Logins": logins }),
            )
            .await?;
        let identity_id = json["IdentityId"]
            .as_str()
            .ok_or(ExchangeError::Missing("IdentityId"))?
            .to_string();
        debug!(identity_id = %identity_id, "identity resolved");

        let json = self
            .call(
                "GetCredentialsForIdentity",
                &json!({ "IdentityId": identity_id, "Logins": logins }),
            )
            .await?;
        let credentials = &json["Credentials"];

        Ok(DelegatedCredentials {
            access_key_id: credentials["AccessKeyId"]
                .as_str()
                .ok_or(ExchangeError::Missing("AccessKeyId"))?
                .to_string(),
            secret_key: SecretString::from(
                credentials["SecretKey"]
                    .as_str()
                    .ok_or(ExchangeError::Missing("SecretKey"))?
                    .to_string(),
            ),
            session_token: SecretString::from(
                credentials["SessionToken"]
                    .as_str()
                    .ok_or(ExchangeError::Missing("SessionToken"))?
                    .to_string(),
            ),
            expiration: credentials["Expiration"]
                .as_f64()
                .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                .map(|seconds| UNIX_EPOCH + Duration::from_secs_f64(seconds)),
            identity_id,
        })
    }
}

/// Used when no identity pool is configured; every exchange fails, so the
/// relay falls back (or refuses, when delegation is required).
pub struct DisabledExchange;

#[async_trait]
impl CredentialExchange for DisabledExchange {
    async fn exchange(
        &self,
        _id_token: &SecretString,
    ) -> Result<DelegatedCredentials, ExchangeError> {
        Err(ExchangeError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn config(server: &MockServer) -> Arc<AppConfig> {
        Arc::new(
            AppConfig::new()
                .with_region("ap-northeast-1")
                .with_user_pool_id("ap-northeast-1_pool")
                .with_identity_pool_id("ap-northeast-1:pool-id")
                .with_identity_pool_endpoint(server.uri()),
        )
    }

    #[tokio::test]
    async fn exchange_uses_user_pool_login_key() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let logins = json!({
            "cognito-idp.ap-northeast-1.amazonaws.com/ap-northeast-1_pool": "id-token"
        });

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AWSCognitoIdentityService.GetId"))
            .and(body_json(json!({
                "IdentityPoolId": "ap-northeast-1:pool-id",
                "Logins": logins,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "IdentityId": "ap-northeast-1:identity" })),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header(
                "X-Amz-Target",
                "AWSCognitoIdentityService.GetCredentialsForIdentity",
            ))
            .and(body_json(json!({
                "IdentityId": "ap-northeast-1:identity",
                "Logins": logins,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "IdentityId": "ap-northeast-1:identity",
                "Credentials": {
                    "AccessKeyId": "ASIAEXAMPLE",
                    "SecretKey": "secret",
                    "SessionToken": "session",
                    "Expiration": 1_900_000_000.0
                }
            })))
            .mount(&server)
            .await;

        let exchange = IdentityPoolExchange::new(config(&server))?;
        let credentials = exchange
            .exchange(&SecretString::from("id-token".to_string()))
            .await?;

        assert_eq!(credentials.identity_id, "ap-northeast-1:identity");
        assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(credentials.session_token.expose_secret(), "session");
        assert!(credentials.expiration.is_some());
        assert!(!format!("{credentials:?}").contains("secret\""));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_token_is_an_error() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "NotAuthorizedException",
                "message": "Invalid login token."
            })))
            .mount(&server)
            .await;

        let exchange = IdentityPoolExchange::new(config(&server))?;
        match exchange
            .exchange(&SecretString::from("forged".to_string()))
            .await
        {
            Err(ExchangeError::Provider(err)) => {
                assert_eq!(err.code(), Some("NotAuthorizedException"));
            }
            other => bail!("unexpected result {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn missing_identity_pool_is_a_config_error() {
        let exchange = IdentityPoolExchange::new(Arc::new(AppConfig::new())).ok();
        let result = match exchange {
            Some(exchange) => {
                exchange
                    .exchange(&SecretString::from("id-token".to_string()))
                    .await
            }
            None => return,
        };
        assert!(matches!(
            result,
            Err(ExchangeError::Config(ConfigError::Missing("identity pool id")))
        ));
        assert!(matches!(
            DisabledExchange
                .exchange(&SecretString::from("id-token".to_string()))
                .await,
            Err(ExchangeError::Disabled)
        ));
    }
}
