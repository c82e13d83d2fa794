//! Authenticated shell.
//!
//! Top-level controller of a client: it owns the session manager, derives
//! the role after every auth-affecting call and decides what is reachable.
//! The user-creation workflow only exists inside [`AdminConsole`], which is
//! built for admin sessions and dropped for everyone else.

use crate::{
    config::AppConfig,
    identity::{
        AuthError, Identity, IdentityProvider, RegistrationWorkflow, Role, SessionManager,
        SessionState, SignInRedirect,
    },
    todos::{Todo, TodoError, TodoStore, TodoSubscription},
};
use secrecy::SecretString;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

pub const NON_ADMIN_NOTICE: &str = "User creation is available to administrators only.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShellError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Todo(#[from] TodoError),
    #[error("{0}")]
    Unavailable(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    SignIn,
    ViewProfile,
    ViewTokens,
    ManageTodos,
    CreateUser,
    SignOut,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SignIn => "sign in",
            Self::ViewProfile => "view profile",
            Self::ViewTokens => "view tokens",
            Self::ManageTodos => "manage todos",
            Self::CreateUser => "create user",
            Self::SignOut => "sign out",
        };
        f.write_str(label)
    }
}

/// Admin-only area. Holding one is the proof that the session was admin
/// when it was built.
pub struct AdminConsole {
    registration: RegistrationWorkflow,
}

impl AdminConsole {
    fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            registration: RegistrationWorkflow::new(provider),
        }
    }

    pub fn registration(&mut self) -> &mut RegistrationWorkflow {
        &mut self.registration
    }
}

/// What the console should render right now.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellView {
    Loading,
    SignedOut {
        summary: Vec<(&'static str, String)>,
    },
    SignedIn {
        identity: Identity,
        role: Role,
        notice: Option<&'static str>,
    },
}

pub struct Shell {
    config: Arc<AppConfig>,
    provider: Arc<dyn IdentityProvider>,
    session: SessionManager,
    store: Arc<dyn TodoStore>,
    admin: Option<AdminConsole>,
    subscription: Option<TodoSubscription>,
    todos: watch::Receiver<Vec<Todo>>,
    locale: String,
    error: Option<String>,
}

impl Shell {
    #[must_use]
    pub fn new(
        config: Arc<AppConfig>,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn TodoStore>,
        locale: impl Into<String>,
    ) -> Self {
        let (_, todos) = watch::channel(Vec::new());
        Self {
            config,
            session: SessionManager::new(provider.clone()),
            provider,
            store,
            admin: None,
            subscription: None,
            todos,
            locale: locale.into(),
            error: None,
        }
    }

    /// Resolve the session at startup.
    pub async fn start(&mut self) {
        self.session.resume().await;
        self.sync();
    }

    /// Re-derive the role and the resources tied to the session.
    fn sync(&mut self) {
        let role = self.session.role();

        if !self.session.is_authenticated() {
            if self.subscription.take().is_some() {
                debug!("todo subscription released");
            }
            self.admin = None;
            let (_, todos) = watch::channel(Vec::new());
            self.todos = todos;
            return;
        }

        if self.subscription.is_none() {
            let (sender, todos) = watch::channel(Vec::new());
            self.todos = todos;
            self.subscription = Some(TodoSubscription::spawn(
                self.store.observe(),
                move |snapshot| {
                    sender.send_replace(snapshot);
                },
            ));
            debug!("todo subscription started");
        }

        match (role, self.admin.is_some()) {
            (Role::Admin, false) => {
                info!("admin console enabled");
                self.admin = Some(AdminConsole::new(self.provider.clone()));
            }
            (Role::Standard, true) => self.admin = None,
            _ => {}
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.session.role()
    }

    /// Last error worth showing; cleared when the next action starts.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn reachable_actions(&self) -> Vec<Action> {
        match self.session.state() {
            SessionState::Unknown => Vec::new(),
            SessionState::Unauthenticated => vec![Action::SignIn],
            SessionState::Authenticated(_) => {
                let mut actions = vec![Action::ViewProfile, Action::ViewTokens, Action::ManageTodos];
                if self.admin.is_some() {
                    actions.push(Action::CreateUser);
                }
                actions.push(Action::SignOut);
                actions
            }
        }
    }

    #[must_use]
    pub fn view(&self) -> ShellView {
        match self.session.state() {
            SessionState::Unknown => ShellView::Loading,
            SessionState::Unauthenticated => ShellView::SignedOut {
                summary: self.config.summary(),
            },
            SessionState::Authenticated(session) => {
                let role = session.role();
                ShellView::SignedIn {
                    identity: session.identity.clone(),
                    role,
                    notice: (!role.is_admin()).then_some(NON_ADMIN_NOTICE),
                }
            }
        }
    }

    /// `None` unless the current session is admin.
    pub fn admin_console(&mut self) -> Option<&mut AdminConsole> {
        self.admin.as_mut()
    }

    /// # Errors
    /// Returns a `Sign-in error` if the redirect cannot be built.
    pub async fn sign_in(&mut self) -> Result<SignInRedirect, ShellError> {
        self.error = None;
        let result = self.session.begin_interactive_sign_in(&self.locale).await;
        self.sync();
        result.map_err(|err| self.fail(err.into()))
    }

    /// # Errors
    /// Returns the callback error (for example `access_denied`).
    pub async fn complete_sign_in(&mut self, callback: &Url) -> Result<(), ShellError> {
        self.error = None;
        let result = self
            .session
            .complete_sign_in(callback)
            .await
            .map(|_| ());
        self.sync();
        result.map_err(|err| self.fail(err.into()))
    }

    /// Give up on a redirect that never came back (or came back unusable)
    /// and re-derive the session from the provider.
    pub async fn abandon_sign_in(&mut self, reason: Option<String>) {
        self.session.resume().await;
        self.sync();
        self.error = reason;
    }

    /// Signed-out state is reached even when the error is returned.
    ///
    /// # Errors
    /// Returns a `Sign-out error` if remote revocation failed.
    pub async fn sign_out(&mut self) -> Result<(), ShellError> {
        self.error = None;
        let result = self.session.sign_out().await;
        self.sync();
        result.map_err(|err| self.fail(err.into()))
    }

    /// Hosted page to open after [`Shell::sign_out`], if any.
    #[must_use]
    pub fn sign_out_url(&self) -> Option<Url> {
        self.provider.sign_out_url()
    }

    /// ID token of the current session, for the bearer of relay calls.
    /// Noticing expiry here signs the shell out.
    pub fn id_token(&mut self) -> Option<SecretString> {
        let token = self.session.tokens().map(|tokens| tokens.id_token.clone());
        if token.is_none() {
            self.sync();
        }
        token
    }

    #[must_use]
    pub fn todos(&self) -> Vec<Todo> {
        self.todos.borrow().clone()
    }

    /// # Errors
    /// Returns an error when signed out or if the store rejects the todo.
    pub async fn add_todo(&mut self, content: Option<String>) -> Result<Todo, ShellError> {
        self.require_session()?;
        let result = self.store.create(content).await;
        result.map_err(|err| self.fail(err.into()))
    }

    /// # Errors
    /// Returns an error when signed out or if the todo does not exist.
    pub async fn remove_todo(&mut self, id: Uuid) -> Result<(), ShellError> {
        self.require_session()?;
        let result = self.store.delete(id).await;
        result.map_err(|err| self.fail(err.into()))
    }

    fn require_session(&mut self) -> Result<(), ShellError> {
        self.error = None;
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(self.fail(ShellError::Unavailable("Sign in to manage todos")))
        }
    }

    fn fail(&mut self, err: ShellError) -> ShellError {
        self.error = Some(err.to_string());
        err
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        identity::{memory::MemoryIdentityProvider, Attributes, ATTR_IS_ADMIN},
        todos::MemoryTodoStore,
    };
    use std::time::Duration;

    async fn shell_for(attributes: Attributes) -> (Shell, Arc<MemoryIdentityProvider>) {
        let provider = Arc::new(MemoryIdentityProvider::new());
        provider
            .seed_user("u@example.com", attributes, true)
            .await;
        provider.sign_in_as("u@example.com").await.unwrap();

        let mut shell = Shell::new(
            Arc::new(AppConfig::new()),
            provider.clone(),
            Arc::new(MemoryTodoStore::new()),
            "en",
        );
        shell.start().await;
        (shell, provider)
    }

    #[tokio::test]
    async fn standard_user_has_no_registration_workflow() {
        let (mut shell, provider) = shell_for(Attributes::new()).await;

        assert_eq!(shell.role(), Role::Standard);
        assert!(shell.admin_console().is_none());
        assert!(!shell.reachable_actions().contains(&Action::CreateUser));
        match shell.view() {
            ShellView::SignedIn { notice, .. } => assert_eq!(notice, Some(NON_ADMIN_NOTICE)),
            other => panic!("unexpected view {other:?}"),
        }
        assert_eq!(provider.registration_calls(), 0);
    }

    #[tokio::test]
    async fn flag_other_than_true_is_not_admin() {
        let (mut shell, _) = shell_for(Attributes::from([(
            ATTR_IS_ADMIN.to_string(),
            "True".to_string(),
        )]))
        .await;
        assert!(shell.admin_console().is_none());
    }

    #[tokio::test]
    async fn admin_gets_console_until_sign_out() {
        let (mut shell, _) = shell_for(Attributes::from([(
            ATTR_IS_ADMIN.to_string(),
            "true".to_string(),
        )]))
        .await;

        assert!(shell.admin_console().is_some());
        assert_eq!(
            shell.reachable_actions(),
            vec![
                Action::ViewProfile,
                Action::ViewTokens,
                Action::ManageTodos,
                Action::CreateUser,
                Action::SignOut,
            ]
        );

        shell.sign_out().await.unwrap();
        assert_eq!(shell.sign_out_url(), None);
        assert!(shell.admin_console().is_none());
        assert_eq!(shell.reachable_actions(), vec![Action::SignIn]);
        assert!(shell.id_token().is_none());
    }

    #[tokio::test]
    async fn signed_out_view_shows_configuration_summary() {
        let mut shell = Shell::new(
            Arc::new(AppConfig::new().with_region("ap-northeast-1")),
            Arc::new(MemoryIdentityProvider::new()),
            Arc::new(MemoryTodoStore::new()),
            "ja",
        );
        assert_eq!(shell.view(), ShellView::Loading);
        assert!(shell.reachable_actions().is_empty());

        shell.start().await;
        let ShellView::SignedOut { summary } = shell.view() else {
            panic!("expected signed-out view");
        };
        assert!(summary.contains(&("Region", "ap-northeast-1".to_string())));
        assert!(summary.contains(&("Client ID", "unset".to_string())));

        assert!(matches!(
            shell.add_todo(Some("nope".to_string())).await,
            Err(ShellError::Unavailable(_))
        ));
        assert_eq!(shell.error(), Some("Sign in to manage todos"));
    }

    #[tokio::test]
    async fn todos_follow_the_session() {
        let (mut shell, _) = shell_for(Attributes::new()).await;

        let todo = shell.add_todo(Some("write docs".to_string())).await.unwrap();
        let mut seen = false;
        for _ in 0..50 {
            if shell.todos().contains(&todo) {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen);

        shell.sign_out().await.unwrap();
        assert!(shell.todos().is_empty());
    }

    #[tokio::test]
    async fn failed_callback_is_reported_on_the_shell() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let mut shell = Shell::new(
            Arc::new(AppConfig::new()),
            provider,
            Arc::new(MemoryTodoStore::new()),
            "en",
        );
        shell.start().await;
        shell.sign_in().await.unwrap();
        assert_eq!(shell.view(), ShellView::Loading);

        let callback = Url::parse("http://localhost/?error=access_denied").unwrap();
        assert!(shell.complete_sign_in(&callback).await.is_err());
        assert_eq!(
            shell.error(),
            Some("Authentication error: access_denied (no details)")
        );
        assert_eq!(shell.reachable_actions(), vec![Action::SignIn]);
    }

    #[tokio::test]
    async fn abandoned_sign_in_offers_sign_in_again() {
        let mut shell = Shell::new(
            Arc::new(AppConfig::new()),
            Arc::new(MemoryIdentityProvider::new()),
            Arc::new(MemoryTodoStore::new()),
            "en",
        );
        shell.start().await;
        shell.sign_in().await.unwrap();
        assert!(shell.reachable_actions().is_empty());

        shell
            .abandon_sign_in(Some("Invalid callback URL".to_string()))
            .await;

        assert_eq!(shell.reachable_actions(), vec![Action::SignIn]);
        assert!(matches!(shell.view(), ShellView::SignedOut { .. }));
        assert_eq!(shell.error(), Some("Invalid callback URL"));

        // A fresh attempt still completes.
        let redirect = shell.sign_in().await.unwrap();
        assert!(redirect.url.as_str().contains(&redirect.state));
    }
}
