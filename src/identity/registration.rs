//! User creation workflow (sign-up, then confirmation when the provider asks
//! for it).
//!
//! Flow Overview:
//! 1. `submit_registration` validates locally, then calls sign-up. The
//!    request, password included, is consumed and dropped by that call.
//! 2. If the provider wants a code, the workflow waits in
//!    `PendingConfirmation`; `confirm_registration` may be retried and
//!    `resend_confirmation_code` may be called any number of times.
//! 3. `Complete` keeps only the username for the success notice.

use super::{
    AuthError, Attributes, CodeDelivery, ConfirmSignUpOutcome, IdentityProvider, SignUpOutcome,
    ATTR_EMAIL, ATTR_IS_ADMIN, ATTR_NAME, ATTR_TENANT_ID,
};
use crate::config::DEFAULT_TENANT_ID;
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::Arc};
use tracing::{info, instrument, warn};

const MIN_PASSWORD_LENGTH: usize = 8;

/// Input of the user creation form. The email doubles as the username.
pub struct RegistrationRequest {
    pub email: String,
    pub display_name: String,
    pub password: SecretString,
    pub admin: bool,
    pub tenant_id: String,
}

impl RegistrationRequest {
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        display_name: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            email: email.into(),
            display_name: display_name.into(),
            password,
            admin: false,
            tenant_id: DEFAULT_TENANT_ID.to_string(),
        }
    }

    #[must_use]
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Check the form before anything is sent to the provider.
    ///
    /// # Errors
    /// Returns the first failing rule as an actionable message.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.email.trim().is_empty() {
            return Err(AuthError::validation("Enter an email address"));
        }
        if !self.email.contains('@') {
            return Err(AuthError::validation("Enter a valid email address"));
        }
        if self.display_name.trim().is_empty() {
            return Err(AuthError::validation("Enter a display name"));
        }
        let password = self.password.expose_secret();
        if password.trim().is_empty() || password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::validation(
                "Password must be at least 8 characters",
            ));
        }
        Ok(())
    }

    fn attributes(&self) -> Attributes {
        Attributes::from([
            (ATTR_EMAIL.to_string(), self.email.trim().to_string()),
            (ATTR_NAME.to_string(), self.display_name.trim().to_string()),
            (ATTR_IS_ADMIN.to_string(), self.admin.to_string()),
            (ATTR_TENANT_ID.to_string(), self.tenant_id.clone()),
        ])
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("password", &"***")
            .field("admin", &self.admin)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationPhase {
    Idle,
    Submitting {
        username: String,
    },
    PendingConfirmation {
        username: String,
        delivery: Option<CodeDelivery>,
        error: Option<String>,
    },
    Confirming {
        username: String,
    },
    Complete {
        username: String,
    },
    Failed {
        reason: String,
    },
}

impl RegistrationPhase {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting { .. } => "submitting",
            Self::PendingConfirmation { .. } => "pending-confirmation",
            Self::Confirming { .. } => "confirming",
            Self::Complete { .. } => "complete",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Complete { username: String },
    /// Provider needs another step; the workflow stays pending.
    NextStep(String),
}

pub struct RegistrationWorkflow {
    provider: Arc<dyn IdentityProvider>,
    phase: RegistrationPhase,
    notice: Option<String>,
}

impl RegistrationWorkflow {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            phase: RegistrationPhase::Idle,
            notice: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> &RegistrationPhase {
        &self.phase
    }

    /// Last success message, cleared when the next operation starts.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// A remote call is outstanding; triggering controls should be disabled.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self.phase,
            RegistrationPhase::Submitting { .. } | RegistrationPhase::Confirming { .. }
        )
    }

    fn pending_username(&self) -> Option<String> {
        match &self.phase {
            RegistrationPhase::PendingConfirmation { username, .. } => Some(username.clone()),
            _ => None,
        }
    }

    /// Create the account.
    ///
    /// # Errors
    /// Returns a validation error (phase unchanged, provider untouched), an
    /// invalid-state error while a confirmation is pending, or the provider's
    /// rejection (phase `Failed`).
    #[instrument(skip(self, request), fields(username = %request.email.trim()))]
    pub async fn submit_registration(
        &mut self,
        request: RegistrationRequest,
    ) -> Result<&RegistrationPhase, AuthError> {
        if matches!(
            self.phase,
            RegistrationPhase::PendingConfirmation { .. }
                | RegistrationPhase::Submitting { .. }
                | RegistrationPhase::Confirming { .. }
        ) {
            return Err(AuthError::InvalidState(
                "A registration is already waiting for confirmation",
            ));
        }

        self.notice = None;
        request.validate()?;

        let username = request.email.trim().to_string();
        let attributes = request.attributes();
        self.phase = RegistrationPhase::Submitting {
            username: username.clone(),
        };

        let result = self
            .provider
            .sign_up(&username, &request.password, &attributes)
            .await;
        drop(request);

        match result {
            Ok(SignUpOutcome::Complete) => {
                info!("user created");
                self.notice = Some(format!("Created user \"{username}\""));
                self.phase = RegistrationPhase::Complete { username };
            }
            Ok(SignUpOutcome::ConfirmationRequired { delivery }) => {
                info!("user created, confirmation required");
                self.notice = Some(format!(
                    "Created user \"{username}\". Enter the confirmation code."
                ));
                self.phase = RegistrationPhase::PendingConfirmation {
                    username,
                    delivery,
                    error: None,
                };
            }
            Err(err) => {
                warn!("user creation failed: {err}");
                let err = AuthError::provider("User creation failed", &err);
                self.phase = RegistrationPhase::Failed {
                    reason: err.to_string(),
                };
                return Err(err);
            }
        }

        Ok(&self.phase)
    }

    /// Submit the confirmation code for the pending username.
    ///
    /// # Errors
    /// Returns a validation error for an empty code (no remote call), an
    /// invalid-state error when nothing is pending, or the provider's
    /// rejection; after a rejection the workflow stays pending.
    #[instrument(skip(self, code))]
    pub async fn confirm_registration(&mut self, code: &str) -> Result<ConfirmOutcome, AuthError> {
        let Some(username) = self.pending_username() else {
            return Err(AuthError::InvalidState("No registration is waiting for confirmation"));
        };

        self.notice = None;
        let code = code.trim();
        if code.is_empty() {
            self.set_pending_error(AuthError::validation("Enter the confirmation code").to_string());
            return Err(AuthError::validation("Enter the confirmation code"));
        }

        let previous = std::mem::replace(
            &mut self.phase,
            RegistrationPhase::Confirming {
                username: username.clone(),
            },
        );
        let delivery = match previous {
            RegistrationPhase::PendingConfirmation { delivery, .. } => delivery,
            _ => None,
        };

        match self.provider.confirm_sign_up(&username, code).await {
            Ok(ConfirmSignUpOutcome::Complete) => {
                info!(username = %username, "user confirmed");
                self.notice = Some(format!(
                    "Confirmed \"{username}\". The user can now sign in."
                ));
                self.phase = RegistrationPhase::Complete {
                    username: username.clone(),
                };
                Ok(ConfirmOutcome::Complete { username })
            }
            Ok(ConfirmSignUpOutcome::NextStep(step)) => {
                self.notice = Some(format!("Next step: {step}"));
                self.phase = RegistrationPhase::PendingConfirmation {
                    username,
                    delivery,
                    error: None,
                };
                Ok(ConfirmOutcome::NextStep(step))
            }
            Err(err) => {
                warn!(username = %username, "confirmation failed: {err}");
                let err = AuthError::provider("Confirmation failed", &err);
                self.phase = RegistrationPhase::PendingConfirmation {
                    username,
                    delivery,
                    error: Some(err.to_string()),
                };
                Err(err)
            }
        }
    }

    /// Ask the provider to send the confirmation code again.
    ///
    /// # Errors
    /// Returns an invalid-state error when nothing is pending, or the
    /// provider's rejection; the workflow stays pending either way.
    #[instrument(skip(self))]
    pub async fn resend_confirmation_code(&mut self) -> Result<CodeDelivery, AuthError> {
        let Some(username) = self.pending_username() else {
            return Err(AuthError::InvalidState("No registration is waiting for confirmation"));
        };

        self.notice = None;
        match self.provider.resend_sign_up_code(&username).await {
            Ok(delivery) => {
                self.notice = Some(format!(
                    "Sent the confirmation code again by {}. Check {}.",
                    delivery.medium.label(),
                    delivery.destination.as_deref().unwrap_or("your inbox")
                ));
                self.phase = RegistrationPhase::PendingConfirmation {
                    username,
                    delivery: Some(delivery.clone()),
                    error: None,
                };
                Ok(delivery)
            }
            Err(err) => {
                warn!(username = %username, "resending confirmation code failed: {err}");
                let err = AuthError::provider("Resending the confirmation code failed", &err);
                self.set_pending_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Forget a finished or failed registration and start over.
    pub fn reset(&mut self) {
        self.phase = RegistrationPhase::Idle;
        self.notice = None;
    }

    fn set_pending_error(&mut self, message: String) {
        if let RegistrationPhase::PendingConfirmation { error, .. } = &mut self.phase {
            *error = Some(message);
        }
    }
}
