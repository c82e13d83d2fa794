//! Notification relay.
//!
//! Stateless bridge between an authenticated caller and the email service.
//! Every request resolves its own credential, makes at most one delivery
//! attempt and is answered with a human-readable result. Nothing here
//! returns `Err` to the caller: failures become [`DeliveryResult::Failed`].

pub mod credentials;
pub mod mailer;

use crate::identity::mask_email;
use credentials::CredentialExchange;
use mailer::{Mailer, OutgoingMail, SendCredential};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

pub const DEFAULT_SUBJECT: &str = "Greetings";
pub const MISSING_RECIPIENT: &str = "The email parameter is required to send mail";
const BEARER_SCHEME: &str = "Bearer";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRequest {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Sent {
        message_id: String,
        confirmation: String,
    },
    Failed {
        error: String,
    },
}

impl DeliveryResult {
    /// Text returned to the caller.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Sent { confirmation, .. } => confirmation,
            Self::Failed { error } => error,
        }
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    fn failed(cause: impl std::fmt::Display) -> Self {
        Self::Failed {
            error: format!("Delivery error: could not send email - {cause}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    sender: String,
    require_delegation: bool,
}

impl RelayConfig {
    #[must_use]
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            require_delegation: false,
        }
    }

    /// Refuse to send with the service credential when a caller's token
    /// cannot be exchanged.
    #[must_use]
    pub fn with_require_delegation(mut self, require: bool) -> Self {
        self.require_delegation = require;
        self
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn require_delegation(&self) -> bool {
        self.require_delegation
    }
}

pub struct NotificationRelay {
    config: RelayConfig,
    exchange: Arc<dyn CredentialExchange>,
    mailer: Arc<dyn Mailer>,
}

/// Extract the bearer token from an `Authorization` value. The scheme is
/// matched case-insensitively; a value without it is taken as the raw
/// token. A scheme with no token is no bearer at all.
#[must_use]
pub fn bearer_from_header(value: Option<&str>) -> Option<SecretString> {
    let value = value?.trim_start();
    let token = match value.get(..BEARER_SCHEME.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER_SCHEME) => {
            let rest = &value[BEARER_SCHEME.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest
            } else {
                value
            }
        }
        _ => value,
    }
    .trim();
    if token.is_empty() {
        None
    } else {
        Some(SecretString::from(token.to_string()))
    }
}

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl NotificationRelay {
    #[must_use]
    pub fn new(
        config: RelayConfig,
        exchange: Arc<dyn CredentialExchange>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            exchange,
            mailer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay one notification request.
    #[instrument(skip(self, request, bearer), fields(bearer = bearer.is_some()))]
    pub async fn relay(
        &self,
        request: NotificationRequest,
        bearer: Option<SecretString>,
    ) -> DeliveryResult {
        let Some(email) = request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
        else {
            debug!("request without recipient");
            return DeliveryResult::Failed {
                error: MISSING_RECIPIENT.to_string(),
            };
        };

        if !valid_email(email) {
            return DeliveryResult::failed("invalid recipient address");
        }

        let credential = match self.resolve_credential(bearer.as_ref()).await {
            Ok(credential) => credential,
            Err(result) => return result,
        };

        let mail = self.compose(&request.name, email, &request);

        match self.mailer.send(&mail, &credential).await {
            Ok(message_id) => {
                info!(
                    to = %mask_email(email),
                    credential = credential.kind(),
                    message_id = %message_id,
                    "email sent"
                );
                DeliveryResult::Sent {
                    confirmation: format!(
                        "Sent email to {} ({email}). Message ID: {message_id}",
                        request.name
                    ),
                    message_id,
                }
            }
            Err(err) => {
                warn!(to = %mask_email(email), "email delivery failed: {err}");
                DeliveryResult::failed(err)
            }
        }
    }

    async fn resolve_credential(
        &self,
        bearer: Option<&SecretString>,
    ) -> Result<SendCredential, DeliveryResult> {
        let Some(token) = bearer.filter(|token| !token.expose_secret().is_empty()) else {
            debug!("no bearer token, using the service credential");
            return Ok(SendCredential::Service);
        };

        match self.exchange.exchange(token).await {
            Ok(credentials) => {
                debug!(identity_id = %credentials.identity_id, "delegated credentials resolved");
                Ok(SendCredential::Delegated(credentials))
            }
            Err(err) if self.config.require_delegation => {
                warn!("credential exchange failed, delegation required: {err}");
                Err(DeliveryResult::failed(format!(
                    "delegated credentials unavailable: {err}"
                )))
            }
            Err(err) => {
                warn!("credential exchange failed, using the service credential: {err}");
                Ok(SendCredential::Service)
            }
        }
    }

    fn compose(&self, name: &str, email: &str, request: &NotificationRequest) -> OutgoingMail {
        let subject = request
            .subject
            .as_deref()
            .filter(|subject| !subject.is_empty())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string();
        let text = request
            .message
            .clone()
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| {
                format!("Hello, {name}! This is a test message sent from signet.")
            });
        let html = format!(
            "<h1>Hello, {}!</h1><p>{}</p>",
            escape_html(name),
            escape_html(&text)
        );

        OutgoingMail {
            from: self.config.sender.clone(),
            to: email.to_string(),
            subject,
            text,
            html,
        }
    }
}
