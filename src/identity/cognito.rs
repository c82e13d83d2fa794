//! Hosted identity provider client.
//!
//! Two surfaces are used:
//! - the user pool JSON API (`POST /` with an `X-Amz-Target` header) for
//!   sign-up, confirmation, attributes and global sign-out;
//! - the hosted OAuth2 domain (`/oauth2/authorize`, `/oauth2/token`) for the
//!   authorization code flow with PKCE and for token refresh.
//!
//! Tokens live in process memory only.

use super::{
    Attributes, CodeDelivery, ConfirmSignUpOutcome, DeliveryMedium, IdentityProvider,
    ProviderError, SignInRedirect, SignUpOutcome, TokenPair,
};
use crate::config::{AppConfig, ConfigError};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};
use ulid::Ulid;
use url::{form_urlencoded, Url};

pub const USER_POOL_TARGET: &str = "AWSCognitoIdentityProviderService";
pub const AMZ_JSON: &str = "application/x-amz-json-1.1";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const PKCE_VERIFIER_BYTES: usize = 32;
const DEFAULT_EXPIRES_IN: u64 = 3600;

struct PendingAuthorization {
    state: String,
    verifier: SecretString,
}

pub struct CognitoClient {
    config: Arc<AppConfig>,
    http: Client,
    tokens: RwLock<Option<TokenPair>>,
    pending: Mutex<Option<PendingAuthorization>>,
}

impl CognitoClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Arc<AppConfig>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;

        Ok(Self {
            config,
            http,
            tokens: RwLock::new(None),
            pending: Mutex::new(None),
        })
    }

    fn client_id(&self) -> Result<&str, ProviderError> {
        Ok(self
            .config
            .user_pool_client_id
            .as_deref()
            .ok_or(ConfigError::Missing("user pool client id"))?)
    }

    fn redirect_uri(&self) -> Result<&str, ProviderError> {
        Ok(self
            .config
            .oauth
            .redirect_sign_in
            .as_deref()
            .ok_or(ConfigError::Missing("redirect sign-in URL"))?)
    }

    fn oauth_url(&self, path: &str) -> Result<Url, ProviderError> {
        let base = self.config.oauth_base()?;
        base.join(path)
            .map_err(|err| ConfigError::InvalidUrl {
                name: "oauth domain",
                reason: err.to_string(),
            })
            .map_err(ProviderError::from)
    }

    async fn user_pool(&self, operation: &str, payload: &Value) -> Result<Value, ProviderError> {
        let endpoint = self.config.user_pool_endpoint()?;
        amz_json_call(
            &self.http,
            endpoint,
            &format!("{USER_POOL_TARGET}.{operation}"),
            payload,
        )
        .await
    }

    /// Current tokens, refreshing them once they expired.
    async fn valid_tokens(&self) -> Result<TokenPair, ProviderError> {
        let current = self.tokens.read().await.clone();
        let Some(tokens) = current else {
            return Err(ProviderError::NotAuthenticated);
        };
        if !tokens.is_expired() {
            return Ok(tokens);
        }

        let Some(refresh_token) = tokens.refresh_token.clone() else {
            debug!("tokens expired without refresh token");
            self.tokens.write().await.take();
            return Err(ProviderError::NotAuthenticated);
        };

        match self.refresh(&refresh_token).await {
            Ok(refreshed) => {
                *self.tokens.write().await = Some(refreshed.clone());
                Ok(refreshed)
            }
            Err(err @ ProviderError::Rejected { .. }) => {
                warn!("token refresh rejected: {err}");
                self.tokens.write().await.take();
                Err(ProviderError::NotAuthenticated)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, ProviderError> {
        let client_id = self.client_id()?;
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("client_id", client_id)
            .append_pair("refresh_token", refresh_token.expose_secret())
            .finish();

        let json = self.token_endpoint(form).await?;
        let mut tokens = parse_token_response(&json)?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.clone());
        }
        debug!("tokens refreshed");
        Ok(tokens)
    }

    async fn token_endpoint(&self, form: String) -> Result<Value, ProviderError> {
        let token_url = self.oauth_url("/oauth2/token")?;

        let response = self
            .http
            .post(token_url)
            .header(CONTENT_TYPE, FORM_URLENCODED)
            .body(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let json = read_error_json(response).await;
            let code = json["error"].as_str().unwrap_or("token_error");
            let message = json["error_description"]
                .as_str()
                .or_else(|| json["error"].as_str())
                .or_else(|| status.canonical_reason())
                .unwrap_or(code);
            return Err(ProviderError::rejected(code, message));
        }

        read_json(response).await
    }
}

/// Call an `application/x-amz-json-1.1` API.
///
/// # Errors
/// Returns `Rejected` with the service's `__type` and `message` for non-2xx
/// answers, `Transport` or `Decode` otherwise.
pub(crate) async fn amz_json_call(
    http: &Client,
    endpoint: Url,
    target: &str,
    payload: &Value,
) -> Result<Value, ProviderError> {
    let body = serde_json::to_vec(payload).map_err(|err| ProviderError::Decode(err.to_string()))?;

    let response = http
        .post(endpoint)
        .header("X-Amz-Target", target)
        .header(CONTENT_TYPE, AMZ_JSON)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let json = read_error_json(response).await;
        return Err(api_error(status, &json));
    }

    read_json(response).await
}

async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(&bytes).map_err(|err| ProviderError::Decode(err.to_string()))
}

/// Body of a non-2xx answer. Proxies in front of the service answer with
/// HTML, which reads as an empty object.
async fn read_error_json(response: reqwest::Response) -> Value {
    response
        .bytes()
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_else(|| json!({}))
}

/// Map a JSON API error body to `Rejected`. `__type` may carry a namespace
/// (`com.amazonaws...#NotAuthorizedException`).
fn api_error(status: StatusCode, json: &Value) -> ProviderError {
    let code = json["__type"]
        .as_str()
        .map(|kind| kind.rsplit('#').next().unwrap_or(kind))
        .unwrap_or("UnknownError");
    let message = json["message"]
        .as_str()
        .or_else(|| json["Message"].as_str())
        .or_else(|| status.canonical_reason())
        .map_or_else(|| format!("{code} ({status})"), ToString::to_string);
    ProviderError::rejected(code, message)
}

fn parse_token_response(json: &Value) -> Result<TokenPair, ProviderError> {
    let id_token = json["id_token"]
        .as_str()
        .ok_or_else(|| ProviderError::Decode("no id_token found".to_string()))?;
    let access_token = json["access_token"]
        .as_str()
        .ok_or_else(|| ProviderError::Decode("no access_token found".to_string()))?;
    let expires_in = json["expires_in"].as_u64().unwrap_or(DEFAULT_EXPIRES_IN);

    Ok(TokenPair {
        id_token: SecretString::from(id_token.to_string()),
        access_token: SecretString::from(access_token.to_string()),
        refresh_token: json["refresh_token"]
            .as_str()
            .map(|token| SecretString::from(token.to_string())),
        expires_at: SystemTime::now() + Duration::from_secs(expires_in),
    })
}

/// Read the claims of a JWT without verifying it. The token came straight
/// from the token endpoint over TLS.
fn token_claims(token: &str) -> Result<Value, ProviderError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ProviderError::Decode("malformed id token".to_string()))?;
    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
        .map_err(|err| ProviderError::Decode(format!("id token payload: {err}")))?;
    serde_json::from_slice(&bytes).map_err(|err| ProviderError::Decode(err.to_string()))
}

fn username_from_claims(claims: &Value) -> Option<String> {
    claims["cognito:username"]
        .as_str()
        .or_else(|| claims["username"].as_str())
        .or_else(|| claims["sub"].as_str())
        .map(ToString::to_string)
}

fn code_delivery(details: &Value) -> Option<CodeDelivery> {
    if !details.is_object() {
        return None;
    }
    Some(CodeDelivery {
        medium: details["DeliveryMedium"]
            .as_str()
            .map_or(DeliveryMedium::Unknown, DeliveryMedium::parse),
        destination: details["Destination"].as_str().map(ToString::to_string),
        attribute_name: details["AttributeName"].as_str().map(ToString::to_string),
    })
}

fn attribute_list(attributes: &Attributes) -> Value {
    Value::Array(
        attributes
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect(),
    )
}

fn pkce_pair() -> (SecretString, String) {
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let verifier = Base64UrlUnpadded::encode_string(&bytes);
    let challenge = pkce_challenge(&verifier);
    (SecretString::from(verifier), challenge)
}

fn pkce_challenge(verifier: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()))
}

#[async_trait]
impl IdentityProvider for CognitoClient {
    async fn current_identity(&self) -> Result<String, ProviderError> {
        let tokens = self.valid_tokens().await?;
        let claims = token_claims(tokens.id_token.expose_secret())?;
        username_from_claims(&claims)
            .ok_or_else(|| ProviderError::Decode("id token has no username claim".to_string()))
    }

    #[instrument(skip(self))]
    async fn fetch_attributes(&self) -> Result<Attributes, ProviderError> {
        let tokens = self.valid_tokens().await?;
        let json = self
            .user_pool(
                "GetUser",
                &json!({ "AccessToken": tokens.access_token.expose_secret() }),
            )
            .await
            .map_err(|err| match err.code() {
                Some("NotAuthorizedException") => ProviderError::NotAuthenticated,
                _ => err,
            })?;

        let attributes = json["UserAttributes"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|attribute| {
                        Some((
                            attribute["Name"].as_str()?.to_string(),
                            attribute["Value"].as_str().unwrap_or_default().to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(attributes)
    }

    async fn fetch_session(&self) -> Result<Option<TokenPair>, ProviderError> {
        if self.tokens.read().await.is_none() {
            return Ok(None);
        }
        self.valid_tokens().await.map(Some)
    }

    #[instrument(skip(self))]
    async fn redirect_sign_in(&self, locale: &str) -> Result<SignInRedirect, ProviderError> {
        let client_id = self.client_id()?;
        let redirect_uri = self.redirect_uri()?;
        let mut url = self.oauth_url("/oauth2/authorize")?;

        let state = Ulid::new().to_string();
        let (verifier, challenge) = pkce_pair();

        url.query_pairs_mut()
            .append_pair("response_type", &self.config.oauth.response_type)
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.oauth.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("lang", locale);

        *self.pending.lock().await = Some(PendingAuthorization {
            state: state.clone(),
            verifier,
        });

        Ok(SignInRedirect { url, state })
    }

    #[instrument(skip(self, callback))]
    async fn complete_redirect(&self, callback: &Url) -> Result<(), ProviderError> {
        let params: HashMap<String, String> = callback.query_pairs().into_owned().collect();
        let pending = self.pending.lock().await.take();

        if let Some(error) = params.get("error") {
            return Err(ProviderError::Callback {
                error: error.clone(),
                description: params.get("error_description").cloned(),
            });
        }

        let Some(pending) = pending else {
            return Err(ProviderError::Callback {
                error: "invalid_state".to_string(),
                description: Some("no sign-in in progress".to_string()),
            });
        };

        if params.get("state") != Some(&pending.state) {
            return Err(ProviderError::Callback {
                error: "invalid_state".to_string(),
                description: Some("state does not match the sign-in request".to_string()),
            });
        }

        let Some(code) = params.get("code") else {
            return Err(ProviderError::Callback {
                error: "invalid_request".to_string(),
                description: Some("callback has no authorization code".to_string()),
            });
        };

        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("client_id", self.client_id()?)
            .append_pair("code", code)
            .append_pair("redirect_uri", self.redirect_uri()?)
            .append_pair("code_verifier", pending.verifier.expose_secret())
            .finish();

        let json = self.token_endpoint(form).await?;
        let tokens = parse_token_response(&json)?;
        *self.tokens.write().await = Some(tokens);

        debug!("authorization code exchanged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(tokens) = self.tokens.write().await.take() else {
            return Ok(());
        };

        self.user_pool(
            "GlobalSignOut",
            &json!({ "AccessToken": tokens.access_token.expose_secret() }),
        )
        .await?;

        Ok(())
    }

    fn sign_out_url(&self) -> Option<Url> {
        let logout_uri = self.config.oauth.redirect_sign_out.as_deref()?;
        let client_id = self.client_id().ok()?;
        let mut url = self.oauth_url("/logout").ok()?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("logout_uri", logout_uri);
        Some(url)
    }

    #[instrument(skip(self, password, attributes))]
    async fn sign_up(
        &self,
        username: &str,
        password: &SecretString,
        attributes: &Attributes,
    ) -> Result<SignUpOutcome, ProviderError> {
        let json = self
            .user_pool(
                "SignUp",
                &json!({
                    "ClientId": self.client_id()?,
                    "Username": username,
                    "Password": password.expose_secret(),
                    "UserAttributes": attribute_list(attributes),
                }),
            )
            .await?;

        if json["UserConfirmed"].as_bool().unwrap_or(false) {
            Ok(SignUpOutcome::Complete)
        } else {
            Ok(SignUpOutcome::ConfirmationRequired {
                delivery: code_delivery(&json["CodeDeliveryDetails"]),
            })
        }
    }

    #[instrument(skip(self, code))]
    async fn confirm_sign_up(
        &self,
        username: &str,
        code: &str,
    ) -> Result<ConfirmSignUpOutcome, ProviderError> {
        self.user_pool(
            "ConfirmSignUp",
            &json!({
                "ClientId": self.client_id()?,
                "Username": username,
                "ConfirmationCode": code,
            }),
        )
        .await?;

        Ok(ConfirmSignUpOutcome::Complete)
    }

    #[instrument(skip(self))]
    async fn resend_sign_up_code(&self, username: &str) -> Result<CodeDelivery, ProviderError> {
        let json = self
            .user_pool(
                "ResendConfirmationCode",
                &json!({
                    "ClientId": self.client_id()?,
                    "Username": username,
                }),
            )
            .await?;

        Ok(code_delivery(&json["CodeDeliveryDetails"]).unwrap_or(CodeDelivery {
            medium: DeliveryMedium::Unknown,
            destination: None,
            attribute_name: None,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn config(server: &MockServer) -> Arc<AppConfig> {
        Arc::new(
            AppConfig::new()
                .with_region("ap-northeast-1")
                .with_user_pool_id("ap-northeast-1_pool")
                .with_user_pool_client_id("client-id")
                .with_oauth_domain(server.uri())
                .with_redirect_sign_in("http://localhost:5173/")
                .with_user_pool_endpoint(server.uri()),
        )
    }

    fn id_token_for(username: &str) -> String {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none"}"#);
        let claims = json!({ "cognito:username": username, "sub": "0000" });
        let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
        format!("{header}.{payload}.signature")
    }

    async fn signed_in(server: &MockServer, client: &CognitoClient) -> Result<()> {
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": id_token_for("u@example.com"),
                "access_token": "access-token",
                "refresh_token": "refresh-token",
                "expires_in": 3600,
                "token_type": "Bearer",
            })))
            .mount(server)
            .await;

        let redirect = client.redirect_sign_in("en").await?;
        let callback = Url::parse(&format!(
            "http://localhost:5173/?code=auth-code&state={}",
            redirect.state
        ))?;
        client.complete_redirect(&callback).await?;
        Ok(())
    }

    #[test]
    fn pkce_challenge_matches_rfc_example() {
        // RFC 7636, appendix B
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn api_error_strips_namespace() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            &json!({
                "__type": "com.amazonaws.cognito#CodeMismatchException",
                "message": "Invalid code"
            }),
        );
        assert_eq!(err.code(), Some("CodeMismatchException"));
        assert_eq!(err.to_string(), "Invalid code");
    }

    #[tokio::test]
    async fn gateway_html_error_keeps_the_status_text() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(502)
                    .insert_header("Content-Type", "text/html")
                    .set_body_string("<html><body>502 Bad Gateway</body></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>down</html>"))
            .mount(&server)
            .await;

        let client = CognitoClient::new(config(&server))?;
        let err = client
            .sign_up(
                "u@example.com",
                &SecretString::from("password1".to_string()),
                &Attributes::new(),
            )
            .await
            .err();
        assert_eq!(
            err,
            Some(ProviderError::rejected("UnknownError", "Bad Gateway"))
        );

        let redirect = client.redirect_sign_in("en").await?;
        let callback = Url::parse(&format!(
            "http://localhost:5173/?code=auth-code&state={}",
            redirect.state
        ))?;
        let err = client.complete_redirect(&callback).await.err();
        assert_eq!(
            err,
            Some(ProviderError::rejected("token_error", "Service Unavailable"))
        );
        Ok(())
    }

    #[test]
    fn sign_out_url_needs_a_logout_redirect() {
        let config = AppConfig::new()
            .with_user_pool_client_id("client-id")
            .with_oauth_domain("auth.example.com");
        let client = CognitoClient::new(Arc::new(config.clone())).unwrap();
        assert_eq!(client.sign_out_url(), None);

        let client = CognitoClient::new(Arc::new(
            config.with_redirect_sign_out("http://localhost:5173/signed-out"),
        ))
        .unwrap();
        let url = client.sign_out_url().unwrap();
        assert_eq!(url.host_str(), Some("auth.example.com"));
        assert_eq!(url.path(), "/logout");
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query.get("client_id").map(String::as_str), Some("client-id"));
        assert_eq!(
            query.get("logout_uri").map(String::as_str),
            Some("http://localhost:5173/signed-out")
        );
    }

    #[test]
    fn claims_yield_username() {
        let claims = token_claims(&id_token_for("u@example.com")).unwrap();
        assert_eq!(
            username_from_claims(&claims),
            Some("u@example.com".to_string())
        );
        assert!(token_claims("not-a-jwt").is_err());
    }

    #[tokio::test]
    async fn sign_up_rejection_keeps_provider_message() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AWSCognitoIdentityProviderService.SignUp"))
            .and(header("Content-Type", AMZ_JSON))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "UsernameExistsException",
                "message": "User already exists"
            })))
            .mount(&server)
            .await;

        let client = CognitoClient::new(config(&server))?;
        let err = client
            .sign_up(
                "u@example.com",
                &SecretString::from("password1".to_string()),
                &Attributes::new(),
            )
            .await
            .err();

        assert_eq!(
            err,
            Some(ProviderError::rejected(
                "UsernameExistsException",
                "User already exists"
            ))
        );
        Ok(())
    }

    #[tokio::test]
    async fn sign_up_sends_attributes_and_reports_delivery() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AWSCognitoIdentityProviderService.SignUp"))
            .and(body_json(json!({
                "ClientId": "client-id",
                "Username": "u@example.com",
                "Password": "password1",
                "UserAttributes": [
                    { "Name": "custom:isAdmin", "Value": "false" },
                    { "Name": "email", "Value": "u@example.com" },
                ],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "UserConfirmed": false,
                "UserSub": "0000",
                "CodeDeliveryDetails": {
                    "DeliveryMedium": "EMAIL",
                    "Destination": "u***@e***",
                    "AttributeName": "email"
                }
            })))
            .mount(&server)
            .await;

        let client = CognitoClient::new(config(&server))?;
        let attributes = Attributes::from([
            ("email".to_string(), "u@example.com".to_string()),
            ("custom:isAdmin".to_string(), "false".to_string()),
        ]);
        let outcome = client
            .sign_up(
                "u@example.com",
                &SecretString::from("password1".to_string()),
                &attributes,
            )
            .await?;

        let SignUpOutcome::ConfirmationRequired {
            delivery: Some(delivery),
        } = outcome
        else {
            bail!("expected a confirmation step, got {outcome:?}");
        };
        assert_eq!(delivery.medium, DeliveryMedium::Email);
        assert_eq!(delivery.destination.as_deref(), Some("u***@e***"));
        Ok(())
    }

    #[tokio::test]
    async fn authorization_code_exchange_sends_pkce_verifier() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let client = CognitoClient::new(config(&server))?;

        let redirect = client.redirect_sign_in("ja").await?;
        let query: HashMap<String, String> = redirect.url.query_pairs().into_owned().collect();
        assert_eq!(redirect.url.path(), "/oauth2/authorize");
        assert_eq!(query.get("lang").map(String::as_str), Some("ja"));
        assert_eq!(query.get("code_challenge_method").map(String::as_str), Some("S256"));
        assert_eq!(query.get("state"), Some(&redirect.state));

        let verifier = match client.pending.lock().await.as_ref() {
            Some(pending) => pending.verifier.expose_secret().to_string(),
            None => bail!("no pending authorization"),
        };
        assert_eq!(query.get("code_challenge"), Some(&pkce_challenge(&verifier)));

        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(header("Content-Type", FORM_URLENCODED))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains(format!("code_verifier={verifier}").as_str()))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": id_token_for("u@example.com"),
                "access_token": "access-token",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let callback = Url::parse(&format!(
            "http://localhost:5173/?code=auth-code&state={}",
            redirect.state
        ))?;
        client.complete_redirect(&callback).await?;

        assert_eq!(client.current_identity().await?, "u@example.com");
        Ok(())
    }

    #[tokio::test]
    async fn replayed_callback_is_rejected() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let client = CognitoClient::new(config(&server))?;
        signed_in(&server, &client).await?;

        let callback = Url::parse("http://localhost:5173/?code=auth-code&state=whatever")?;
        let err = client.complete_redirect(&callback).await.err();
        assert!(matches!(err, Some(ProviderError::Callback { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn get_user_maps_attributes_and_revoked_tokens() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let client = CognitoClient::new(config(&server))?;
        signed_in(&server, &client).await?;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AWSCognitoIdentityProviderService.GetUser"))
            .and(body_json(json!({ "AccessToken": "access-token" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Username": "u@example.com",
                "UserAttributes": [
                    { "Name": "email", "Value": "u@example.com" },
                    { "Name": "custom:isAdmin", "Value": "true" }
                ]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let attributes = client.fetch_attributes().await?;
        assert_eq!(
            attributes.get("custom:isAdmin").map(String::as_str),
            Some("true")
        );

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AWSCognitoIdentityProviderService.GetUser"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "NotAuthorizedException",
                "message": "Access Token has been revoked"
            })))
            .mount(&server)
            .await;

        assert_eq!(
            client.fetch_attributes().await.err(),
            Some(ProviderError::NotAuthenticated)
        );
        Ok(())
    }

    #[tokio::test]
    async fn sign_out_drops_tokens_even_when_revocation_fails() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let client = CognitoClient::new(config(&server))?;
        signed_in(&server, &client).await?;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header(
                "X-Amz-Target",
                "AWSCognitoIdentityProviderService.GlobalSignOut",
            ))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(client.sign_out().await.is_err());
        assert!(client.fetch_session().await?.is_none());
        assert_eq!(
            client.current_identity().await.err(),
            Some(ProviderError::NotAuthenticated)
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_are_refreshed() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let client = CognitoClient::new(config(&server))?;

        *client.tokens.write().await = Some(TokenPair {
            id_token: SecretString::from(id_token_for("u@example.com")),
            access_token: SecretString::from("stale".to_string()),
            refresh_token: Some(SecretString::from("refresh-token".to_string())),
            expires_at: SystemTime::now() - Duration::from_secs(1),
        });

        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": id_token_for("u@example.com"),
                "access_token": "fresh",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let Some(tokens) = client.fetch_session().await? else {
            bail!("expected refreshed tokens");
        };
        assert_eq!(tokens.access_token.expose_secret(), "fresh");
        assert!(tokens.refresh_token.is_some());
        assert!(!tokens.is_expired());
        Ok(())
    }

    #[tokio::test]
    async fn missing_client_id_is_a_config_error() -> Result<()> {
        let client = CognitoClient::new(Arc::new(AppConfig::new().with_region("us-east-1")))?;
        let err = client.resend_sign_up_code("u@example.com").await.err();
        assert_eq!(
            err,
            Some(ProviderError::Config(ConfigError::Missing(
                "user pool client id"
            )))
        );
        Ok(())
    }
}
