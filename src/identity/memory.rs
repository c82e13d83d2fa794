//! In-memory identity provider for local runs.
//!
//! Accounts live in process memory and every confirmation code is the fixed
//! code given at construction (`123456` by default). The hosted sign-in page
//! is simulated: the redirect URL carries the state nonce, and the callback
//! is accepted when its `code` parameter is the username of a confirmed
//! account. Tokens are random opaque strings and are never refreshed.

use super::{
    mask_email, Attributes, CodeDelivery, ConfirmSignUpOutcome, DeliveryMedium, IdentityProvider,
    ProviderError, SignInRedirect, SignUpOutcome, TokenPair, ATTR_EMAIL,
};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, SystemTime},
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use ulid::Ulid;
use url::Url;

pub const DEFAULT_CONFIRMATION_CODE: &str = "123456";
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);
const MIN_PASSWORD_LENGTH: usize = 8;
const HOSTED_SIGN_IN_URL: &str = "http://localhost/oauth2/authorize";

struct Account {
    attributes: Attributes,
    confirmed: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    signed_in: Option<String>,
    tokens: Option<TokenPair>,
    pending_state: Option<String>,
    fail_next_sign_out: bool,
}

pub struct MemoryIdentityProvider {
    state: Mutex<State>,
    confirmation_code: String,
    require_confirmation: bool,
    token_ttl: Duration,
    registration_calls: AtomicUsize,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            confirmation_code: DEFAULT_CONFIRMATION_CODE.to_string(),
            require_confirmation: true,
            token_ttl: DEFAULT_TOKEN_TTL,
            registration_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_confirmation_code(mut self, code: impl Into<String>) -> Self {
        self.confirmation_code = code.into();
        self
    }

    /// When disabled, sign-up completes immediately (auto-confirmed pools).
    #[must_use]
    pub fn with_confirmation_required(mut self, required: bool) -> Self {
        self.require_confirmation = required;
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Number of sign-up, confirm and resend calls that reached the provider.
    #[must_use]
    pub fn registration_calls(&self) -> usize {
        self.registration_calls.load(Ordering::SeqCst)
    }

    pub async fn seed_user(
        &self,
        username: &str,
        mut attributes: Attributes,
        confirmed: bool,
    ) {
        attributes
            .entry(ATTR_EMAIL.to_string())
            .or_insert_with(|| username.to_string());
        self.state.lock().await.accounts.insert(
            username.to_string(),
            Account {
                attributes,
                confirmed,
            },
        );
    }

    /// Sign in directly, skipping the simulated hosted page.
    ///
    /// # Errors
    /// Returns `NotAuthorizedException` for unknown or unconfirmed accounts.
    pub async fn sign_in_as(&self, username: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        self.establish(&mut state, username)
    }

    /// Make the next remote sign-out fail (local tokens are still dropped).
    pub async fn fail_next_sign_out(&self) {
        self.state.lock().await.fail_next_sign_out = true;
    }

    fn establish(&self, state: &mut State, username: &str) -> Result<(), ProviderError> {
        match state.accounts.get(username) {
            Some(account) if account.confirmed => {}
            Some(_) => {
                return Err(ProviderError::rejected(
                    "UserNotConfirmedException",
                    "User is not confirmed.",
                ))
            }
            None => {
                return Err(ProviderError::rejected(
                    "NotAuthorizedException",
                    "Incorrect username or password.",
                ))
            }
        }

        state.signed_in = Some(username.to_string());
        state.tokens = Some(TokenPair {
            id_token: random_token(),
            access_token: random_token(),
            refresh_token: Some(random_token()),
            expires_at: SystemTime::now() + self.token_ttl,
        });
        info!(username = %username, "memory provider signed in");
        Ok(())
    }
}

fn random_token() -> SecretString {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    SecretString::from(Base64UrlUnpadded::encode_string(&bytes))
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn current_identity(&self) -> Result<String, ProviderError> {
        self.state
            .lock()
            .await
            .signed_in
            .clone()
            .ok_or(ProviderError::NotAuthenticated)
    }

    async fn fetch_attributes(&self) -> Result<Attributes, ProviderError> {
        let state = self.state.lock().await;
        let username = state
            .signed_in
            .as_deref()
            .ok_or(ProviderError::NotAuthenticated)?;
        state
            .accounts
            .get(username)
            .map(|account| account.attributes.clone())
            .ok_or(ProviderError::NotAuthenticated)
    }

    async fn fetch_session(&self) -> Result<Option<TokenPair>, ProviderError> {
        Ok(self.state.lock().await.tokens.clone())
    }

    async fn redirect_sign_in(&self, locale: &str) -> Result<SignInRedirect, ProviderError> {
        let state_nonce = Ulid::new().to_string();
        let mut url = Url::parse(HOSTED_SIGN_IN_URL)
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("state", &state_nonce)
            .append_pair("lang", locale);

        self.state.lock().await.pending_state = Some(state_nonce.clone());
        Ok(SignInRedirect {
            url,
            state: state_nonce,
        })
    }

    async fn complete_redirect(&self, callback: &Url) -> Result<(), ProviderError> {
        let params: HashMap<String, String> = callback.query_pairs().into_owned().collect();
        let mut state = self.state.lock().await;
        let pending = state.pending_state.take();

        if let Some(error) = params.get("error") {
            return Err(ProviderError::Callback {
                error: error.clone(),
                description: params.get("error_description").cloned(),
            });
        }

        let (Some(code), Some(returned_state)) = (params.get("code"), params.get("state")) else {
            return Err(ProviderError::Callback {
                error: "invalid_request".to_string(),
                description: Some("callback is missing code or state".to_string()),
            });
        };

        if pending.as_deref() != Some(returned_state.as_str()) {
            return Err(ProviderError::Callback {
                error: "invalid_state".to_string(),
                description: Some("no matching sign-in in progress".to_string()),
            });
        }

        self.establish(&mut state, code)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state.signed_in = None;
        state.tokens = None;

        if std::mem::take(&mut state.fail_next_sign_out) {
            return Err(ProviderError::Transport(
                "sign-out endpoint unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn sign_up(
        &self,
        username: &str,
        password: &SecretString,
        attributes: &Attributes,
    ) -> Result<SignUpOutcome, ProviderError> {
        self.registration_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;

        if state.accounts.contains_key(username) {
            return Err(ProviderError::rejected(
                "UsernameExistsException",
                "User already exists",
            ));
        }
        if password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ProviderError::rejected(
                "InvalidPasswordException",
                "Password did not conform with policy: Password not long enough",
            ));
        }

        state.accounts.insert(
            username.to_string(),
            Account {
                attributes: attributes.clone(),
                confirmed: !self.require_confirmation,
            },
        );
        debug!(username = %username, "memory provider account created");

        if self.require_confirmation {
            Ok(SignUpOutcome::ConfirmationRequired {
                delivery: Some(email_delivery(username)),
            })
        } else {
            Ok(SignUpOutcome::Complete)
        }
    }

    async fn confirm_sign_up(
        &self,
        username: &str,
        code: &str,
    ) -> Result<ConfirmSignUpOutcome, ProviderError> {
        self.registration_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let account = state.accounts.get_mut(username).ok_or_else(|| {
            ProviderError::rejected("UserNotFoundException", "Username/client id combination not found.")
        })?;

        if account.confirmed {
            return Err(ProviderError::rejected(
                "NotAuthorizedException",
                "User cannot be confirmed. Current status is CONFIRMED",
            ));
        }
        if code.trim() != self.confirmation_code {
            return Err(ProviderError::rejected(
                "CodeMismatchException",
                "Invalid verification code provided, please try again.",
            ));
        }

        account.confirmed = true;
        Ok(ConfirmSignUpOutcome::Complete)
    }

    async fn resend_sign_up_code(&self, username: &str) -> Result<CodeDelivery, ProviderError> {
        self.registration_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        if !state.accounts.contains_key(username) {
            return Err(ProviderError::rejected(
                "UserNotFoundException",
                "Username/client id combination not found.",
            ));
        }
        Ok(email_delivery(username))
    }
}

fn email_delivery(username: &str) -> CodeDelivery {
    CodeDelivery {
        medium: DeliveryMedium::Email,
        destination: Some(mask_email(username)),
        attribute_name: Some(ATTR_EMAIL.to_string()),
    }
}
