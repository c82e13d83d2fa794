//! Email delivery abstractions.
//!
//! [`HttpMailer`] posts to a mail gateway (`POST <endpoint>/send`) and
//! authorizes with whichever credential the relay resolved. [`LogMailer`] is
//! the local development sender: it logs and hands back a fake message id.

use super::credentials::DelegatedCredentials;
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument};
use ulid::Ulid;
use url::Url;

pub const ACCESS_KEY_HEADER: &str = "X-Signet-Access-Key";
pub const IDENTITY_HEADER: &str = "X-Signet-Identity";

/// Credential used for one delivery attempt.
#[derive(Debug, Clone)]
pub enum SendCredential {
    /// Caller-scoped credentials from the identity pool.
    Delegated(DelegatedCredentials),
    /// The relay's own service credential.
    Service,
}

impl SendCredential {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delegated(_) => "delegated",
            Self::Service => "service",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("{0}")]
    Transport(String),
    #[error("{message} (status {status})")]
    Rejected { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message and return the service's message id.
    async fn send(
        &self,
        mail: &OutgoingMail,
        credential: &SendCredential,
    ) -> Result<String, MailError>;
}

pub struct HttpMailer {
    endpoint: Url,
    api_key: SecretString,
    http: Client,
}

impl HttpMailer {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Url, api_key: SecretString) -> Result<Self, MailError> {
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;
        Ok(Self {
            endpoint,
            api_key,
            http,
        })
    }

    fn send_url(&self) -> String {
        format!("{}/send", self.endpoint.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, mail, credential), fields(credential = credential.kind()))]
    async fn send(
        &self,
        mail: &OutgoingMail,
        credential: &SendCredential,
    ) -> Result<String, MailError> {
        let body = serde_json::to_vec(mail).map_err(|err| MailError::Decode(err.to_string()))?;

        let mut request = self
            .http
            .post(self.send_url())
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        request = match credential {
            SendCredential::Service => request.bearer_auth(self.api_key.expose_secret()),
            SendCredential::Delegated(credentials) => request
                .bearer_auth(credentials.session_token.expose_secret())
                .header(ACCESS_KEY_HEADER, &credentials.access_key_id)
                .header(IDENTITY_HEADER, &credentials.identity_id),
        };

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            // Error pages from proxies are not JSON.
            let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            let message = json["message"]
                .as_str()
                .or_else(|| json["error"].as_str())
                .or_else(|| status.canonical_reason())
                .unwrap_or("mail service error")
                .to_string();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|err| MailError::Decode(err.to_string()))?
        };

        json["message_id"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| MailError::Decode("no message_id found".to_string()))
    }
}

/// Local dev mailer that logs the message instead of sending it.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        mail: &OutgoingMail,
        credential: &SendCredential,
    ) -> Result<String, MailError> {
        let message_id = format!("log-{}", Ulid::new());
        info!(
            to = %mail.to,
            subject = %mail.subject,
            credential = credential.kind(),
            message_id = %message_id,
            "mail send stub"
        );
        Ok(message_id)
    }
}
