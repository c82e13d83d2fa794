//! End-to-end identity lifecycle against the in-memory provider: redirect
//! sign-in, admin-only user creation, confirmation and a second sign-in as
//! the newly created standard user.

use anyhow::{bail, Result};
use secrecy::SecretString;
use signet::{
    config::AppConfig,
    identity::{
        memory::{MemoryIdentityProvider, DEFAULT_CONFIRMATION_CODE},
        Attributes, ConfirmOutcome, RegistrationPhase, RegistrationRequest, Role, ATTR_IS_ADMIN,
        ATTR_NAME, ATTR_TENANT_ID,
    },
    shell::{Action, Shell, ShellView, NON_ADMIN_NOTICE},
    todos::MemoryTodoStore,
};
use std::{sync::Arc, time::Duration};
use url::Url;

const ADMIN: &str = "admin@example.com";
const NEW_USER: &str = "new.user@example.com";

async fn provider() -> Arc<MemoryIdentityProvider> {
    let provider = Arc::new(MemoryIdentityProvider::new());
    let mut attributes = Attributes::new();
    attributes.insert(ATTR_NAME.to_string(), "Admin".to_string());
    attributes.insert(ATTR_IS_ADMIN.to_string(), "true".to_string());
    provider.seed_user(ADMIN, attributes, true).await;
    provider
}

async fn sign_in(shell: &mut Shell, username: &str) -> Result<()> {
    let redirect = shell.sign_in().await?;
    assert_eq!(
        redirect.url.query_pairs().find(|(key, _)| key == "lang").map(|(_, v)| v.to_string()),
        Some("en".to_string())
    );
    let mut callback = Url::parse("http://localhost/callback")?;
    callback
        .query_pairs_mut()
        .append_pair("code", username)
        .append_pair("state", &redirect.state);
    shell.complete_sign_in(&callback).await?;
    Ok(())
}

async fn wait_for_todos(shell: &Shell, count: usize) -> Result<()> {
    for _ in 0..100 {
        if shell.todos().len() == count {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("expected {count} todos, got {}", shell.todos().len())
}

#[tokio::test]
async fn admin_creates_user_who_signs_in_as_standard() -> Result<()> {
    let provider = provider().await;
    let config = Arc::new(AppConfig::new().with_tenant_id("acme"));
    let mut shell = Shell::new(
        config.clone(),
        provider.clone(),
        Arc::new(MemoryTodoStore::new()),
        "en",
    );

    shell.start().await;
    assert_eq!(shell.reachable_actions(), vec![Action::SignIn]);
    assert!(matches!(shell.view(), ShellView::SignedOut { .. }));

    sign_in(&mut shell, ADMIN).await?;
    assert_eq!(shell.role(), Role::Admin);
    assert!(shell.reachable_actions().contains(&Action::CreateUser));
    assert!(shell.id_token().is_some());

    let Some(console) = shell.admin_console() else {
        bail!("admin session has no admin console");
    };
    let workflow = console.registration();
    let request = RegistrationRequest::new(
        NEW_USER,
        "New User",
        SecretString::from("correct horse".to_string()),
    )
    .with_tenant_id(config.tenant_id.clone());
    workflow.submit_registration(request).await?;
    assert!(matches!(
        workflow.phase(),
        RegistrationPhase::PendingConfirmation { username, .. } if username == NEW_USER
    ));

    let outcome = workflow.confirm_registration(DEFAULT_CONFIRMATION_CODE).await?;
    assert_eq!(
        outcome,
        ConfirmOutcome::Complete {
            username: NEW_USER.to_string()
        }
    );
    assert_eq!(
        workflow.notice(),
        Some("Confirmed \"new.user@example.com\". The user can now sign in.")
    );

    shell.sign_out().await?;
    assert!(shell.admin_console().is_none());
    assert_eq!(shell.reachable_actions(), vec![Action::SignIn]);

    sign_in(&mut shell, NEW_USER).await?;
    assert_eq!(shell.role(), Role::Standard);
    assert!(shell.admin_console().is_none());
    assert!(!shell.reachable_actions().contains(&Action::CreateUser));

    match shell.view() {
        ShellView::SignedIn {
            identity, notice, ..
        } => {
            assert_eq!(identity.attribute(ATTR_NAME), Some("New User"));
            assert_eq!(identity.attribute(ATTR_IS_ADMIN), Some("false"));
            assert_eq!(identity.attribute(ATTR_TENANT_ID), Some("acme"));
            assert_eq!(notice, Some(NON_ADMIN_NOTICE));
        }
        other => bail!("unexpected view {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn todos_follow_the_session() -> Result<()> {
    let provider = provider().await;
    let mut shell = Shell::new(
        Arc::new(AppConfig::new()),
        provider,
        Arc::new(MemoryTodoStore::new()),
        "en",
    );
    shell.start().await;
    assert!(shell.add_todo(Some("too early".to_string())).await.is_err());

    sign_in(&mut shell, ADMIN).await?;
    let todo = shell.add_todo(Some("write tests".to_string())).await?;
    wait_for_todos(&shell, 1).await?;
    assert_eq!(shell.todos()[0].content.as_deref(), Some("write tests"));

    shell.remove_todo(todo.id).await?;
    wait_for_todos(&shell, 0).await?;

    shell.add_todo(None).await?;
    wait_for_todos(&shell, 1).await?;

    shell.sign_out().await?;
    assert!(shell.todos().is_empty());

    sign_in(&mut shell, ADMIN).await?;
    wait_for_todos(&shell, 1).await?;
    Ok(())
}

#[tokio::test]
async fn unconfirmed_user_cannot_sign_in() -> Result<()> {
    let provider = provider().await;
    provider.seed_user(NEW_USER, Attributes::new(), false).await;
    let mut shell = Shell::new(
        Arc::new(AppConfig::new()),
        provider,
        Arc::new(MemoryTodoStore::new()),
        "en",
    );
    shell.start().await;

    assert!(sign_in(&mut shell, NEW_USER).await.is_err());
    assert_eq!(shell.reachable_actions(), vec![Action::SignIn]);
    assert!(shell.error().is_some());
    Ok(())
}
