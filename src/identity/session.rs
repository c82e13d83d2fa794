//! Session manager.
//!
//! Flow Overview: `resume` asks the provider who is signed in, then fetches
//! attributes and tokens. Sign-in is a redirect: `begin_interactive_sign_in`
//! suspends the session (`Unknown`) and `complete_sign_in` hands the callback
//! URL back to the provider before resuming from scratch. `sign_out` always
//! leaves the manager `Unauthenticated`, whatever the provider answers.

use super::{
    derive_role, AuthError, Identity, IdentityProvider, ProviderError, Role, SignInRedirect,
    TokenPair,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Signed-in user with the tokens the provider handed out.
#[derive(Clone, Debug)]
pub struct Session {
    pub identity: Identity,
    tokens: Option<TokenPair>,
}

impl Session {
    #[must_use]
    pub fn new(identity: Identity, tokens: Option<TokenPair>) -> Self {
        Self { identity, tokens }
    }

    /// Role derived from the current attributes.
    #[must_use]
    pub fn role(&self) -> Role {
        derive_role(Some(&self.identity))
    }
}

#[derive(Clone, Debug, Default)]
pub enum SessionState {
    /// Not resolved yet (startup, or suspended by a pending redirect).
    #[default]
    Unknown,
    Unauthenticated,
    Authenticated(Session),
}

impl SessionState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Owns the single session of a running client.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    state: SessionState,
}

impl SessionManager {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            state: SessionState::Unknown,
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Authenticated(session) => Some(&session.identity),
            _ => None,
        }
    }

    /// Role of the current identity, recomputed on every call.
    #[must_use]
    pub fn role(&self) -> Role {
        derive_role(self.identity())
    }

    /// Tokens of the current session. An expired pair ends the session.
    pub fn tokens(&mut self) -> Option<&TokenPair> {
        let expired = match &self.state {
            SessionState::Authenticated(session) => {
                session.tokens.as_ref().is_some_and(TokenPair::is_expired)
            }
            _ => false,
        };

        if expired {
            info!("session tokens expired, signing out locally");
            self.state = SessionState::Unauthenticated;
            return None;
        }

        match &self.state {
            SessionState::Authenticated(session) => session.tokens.as_ref(),
            _ => None,
        }
    }

    /// Recover the session without user interaction. Never fails: no session
    /// is the normal first-load state.
    #[instrument(skip(self))]
    pub async fn resume(&mut self) -> &SessionState {
        let username = match self.provider.current_identity().await {
            Ok(username) => username,
            Err(ProviderError::NotAuthenticated) => {
                debug!("no signed-in user");
                self.state = SessionState::Unauthenticated;
                return &self.state;
            }
            Err(err) => {
                warn!("failed to resolve current user: {err}");
                self.state = SessionState::Unauthenticated;
                return &self.state;
            }
        };

        let attributes = match self.provider.fetch_attributes().await {
            Ok(attributes) => attributes,
            Err(err) => {
                warn!("failed to fetch user attributes: {err}");
                super::Attributes::new()
            }
        };

        let tokens = match self.provider.fetch_session().await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!("failed to fetch session tokens: {err}");
                None
            }
        };

        info!(username = %username, "session resumed");
        self.state = SessionState::Authenticated(Session::new(
            Identity::new(username, attributes),
            tokens,
        ));
        &self.state
    }

    /// Start the redirect challenge. The session is suspended until the
    /// caller comes back through [`Self::complete_sign_in`].
    ///
    /// # Errors
    /// Returns a recoverable `Sign-in error` when the redirect cannot be built.
    #[instrument(skip(self))]
    pub async fn begin_interactive_sign_in(
        &mut self,
        locale: &str,
    ) -> Result<SignInRedirect, AuthError> {
        let redirect = self
            .provider
            .redirect_sign_in(locale)
            .await
            .map_err(|err| {
                warn!("sign-in redirect failed: {err}");
                AuthError::provider("Sign-in error", &err)
            })?;

        debug!(state = %redirect.state, "redirecting to hosted sign-in");
        self.state = SessionState::Unknown;
        Ok(redirect)
    }

    /// Resume after the redirect returned to `callback`.
    ///
    /// # Errors
    /// Returns the provider's callback error (for example `access_denied`);
    /// the session is `Unauthenticated` in that case.
    #[instrument(skip(self, callback))]
    pub async fn complete_sign_in(&mut self, callback: &Url) -> Result<&SessionState, AuthError> {
        match self.provider.complete_redirect(callback).await {
            Ok(()) => Ok(self.resume().await),
            Err(err @ ProviderError::Callback { .. }) => {
                warn!("sign-in callback rejected: {err}");
                self.state = SessionState::Unauthenticated;
                Err(AuthError::Validation(err.to_string()))
            }
            Err(err) => {
                warn!("sign-in completion failed: {err}");
                self.state = SessionState::Unauthenticated;
                Err(AuthError::provider("Sign-in error", &err))
            }
        }
    }

    /// Sign out. Local state is cleared before the provider is asked to
    /// revoke, so a remote failure cannot leave a stale session behind.
    ///
    /// # Errors
    /// Returns a recoverable `Sign-out error` if remote revocation failed.
    #[instrument(skip(self))]
    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        self.state = SessionState::Unauthenticated;

        match self.provider.sign_out().await {
            Ok(()) => {
                info!("signed out");
                Ok(())
            }
            Err(err) => {
                warn!("remote sign-out failed: {err}");
                Err(AuthError::provider("Sign-out error", &err))
            }
        }
    }
}
