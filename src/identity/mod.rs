//! Identity lifecycle: provider surface, session, registration and role.
//!
//! The provider itself (token issuance, password policy, attribute storage)
//! lives outside this crate. [`IdentityProvider`] is the surface this crate
//! consumes; [`cognito::CognitoClient`] talks to the hosted service and
//! [`memory::MemoryIdentityProvider`] stands in for it during local runs.

pub mod cognito;
mod error;
pub mod memory;
pub mod registration;
pub mod role;
pub mod session;

pub use error::{AuthError, ProviderError};
pub use registration::{ConfirmOutcome, RegistrationPhase, RegistrationRequest, RegistrationWorkflow};
pub use role::{derive_role, Role};
pub use session::{Session, SessionManager, SessionState};

use async_trait::async_trait;
use secrecy::SecretString;
use std::{collections::BTreeMap, fmt, time::SystemTime};
use url::Url;

pub const ATTR_EMAIL: &str = "email";
pub const ATTR_NAME: &str = "name";
pub const ATTR_IS_ADMIN: &str = "custom:isAdmin";
pub const ATTR_TENANT_ID: &str = "custom:tenant_id";

/// User attributes as stored by the provider (string -> string).
pub type Attributes = BTreeMap<String, String>;

/// A resolved user. Created and mutated only by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub attributes: Attributes,
}

impl Identity {
    #[must_use]
    pub fn new(username: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            username: username.into(),
            attributes,
        }
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Tokens issued on sign-in. The identity token is what downstream services
/// (the notification relay) accept as bearer.
#[derive(Clone)]
pub struct TokenPair {
    pub id_token: SecretString,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: SystemTime,
}

impl TokenPair {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("id_token", &"***")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMedium {
    Email,
    Sms,
    Unknown,
}

impl DeliveryMedium {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "EMAIL" => Self::Email,
            "SMS" => Self::Sms,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "SMS",
            Self::Unknown => "an unknown channel",
        }
    }
}

/// Where a confirmation code was sent; `destination` is masked by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeDelivery {
    pub medium: DeliveryMedium,
    pub destination: Option<String>,
    pub attribute_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignUpOutcome {
    Complete,
    ConfirmationRequired { delivery: Option<CodeDelivery> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmSignUpOutcome {
    Complete,
    /// The provider wants another step before the account is usable.
    NextStep(String),
}

/// Where to send the user for the interactive sign-in challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignInRedirect {
    pub url: Url,
    pub state: String,
}

/// Provider operations consumed by the session and registration workflows.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Username of the signed-in user, without any user interaction.
    async fn current_identity(&self) -> Result<String, ProviderError>;

    /// Attributes of the signed-in user.
    async fn fetch_attributes(&self) -> Result<Attributes, ProviderError>;

    /// Current tokens, refreshed when needed; `None` when signed out.
    async fn fetch_session(&self) -> Result<Option<TokenPair>, ProviderError>;

    /// Start the redirect-based sign-in challenge.
    async fn redirect_sign_in(&self, locale: &str) -> Result<SignInRedirect, ProviderError>;

    /// Finish the challenge from the URL the user was redirected back to.
    async fn complete_redirect(&self, callback: &Url) -> Result<(), ProviderError>;

    /// Forget local tokens and revoke them remotely.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Hosted page that ends the browser session after a sign-out, when the
    /// provider has one.
    fn sign_out_url(&self) -> Option<Url> {
        None
    }

    async fn sign_up(
        &self,
        username: &str,
        password: &SecretString,
        attributes: &Attributes,
    ) -> Result<SignUpOutcome, ProviderError>;

    async fn confirm_sign_up(
        &self,
        username: &str,
        code: &str,
    ) -> Result<ConfirmSignUpOutcome, ProviderError>;

    async fn resend_sign_up_code(&self, username: &str) -> Result<CodeDelivery, ProviderError>;
}

/// Mask an email address the way the provider reports delivery destinations.
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let local_head = local.chars().next().map(String::from).unwrap_or_default();
            let domain_head = domain.chars().next().map(String::from).unwrap_or_default();
            format!("{local_head}***@{domain_head}***")
        }
        None => "***".to_string(),
    }
}
