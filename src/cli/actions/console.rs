//! Interactive terminal client on top of [`Shell`].
//!
//! Every screen is rendered from [`Shell::view`] and the menu only offers
//! [`Shell::reachable_actions`], so the create-user prompt never shows up for
//! a standard session.

use crate::{
    config::AppConfig,
    identity::{
        cognito::CognitoClient, memory::MemoryIdentityProvider, Attributes, ConfirmOutcome,
        IdentityProvider, RegistrationPhase, RegistrationRequest, ATTR_IS_ADMIN, ATTR_NAME,
    },
    shell::{Action, Shell, ShellView},
    todos::MemoryTodoStore,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{
    io::{IsTerminal, Write},
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info};
use url::Url;

pub const LOCAL_ADMIN: &str = "admin@signet.local";
const LOCAL_CALLBACK: &str = "http://localhost/callback";

#[derive(Debug)]
pub struct Args {
    pub app: AppConfig,
    pub local: bool,
    pub locale: String,
}

struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// `None` on end of input.
    async fn ask(&mut self, label: &str) -> Result<Option<String>> {
        print!("{label}: ");
        std::io::stdout().flush()?;
        Ok(self
            .lines
            .next_line()
            .await?
            .map(|line| line.trim().to_string()))
    }

    /// Read a secret without echo when attached to a terminal. Piped input
    /// is read like any other line.
    async fn ask_secret(&mut self, label: &str) -> Result<Option<SecretString>> {
        if !std::io::stdin().is_terminal() {
            return Ok(self.ask(label).await?.map(SecretString::from));
        }
        let label = format!("{label}: ");
        let secret = tokio::task::spawn_blocking(move || rpassword::prompt_password(label))
            .await
            .context("Password prompt task failed")?
            .context("Could not read the password")?;
        Ok(Some(SecretString::from(secret)))
    }
}

/// Build the provider the console talks to. Without a user pool the console
/// runs against the in-memory provider seeded with one administrator.
async fn provider(args: &Args, config: &Arc<AppConfig>) -> Result<Arc<dyn IdentityProvider>> {
    if args.local || config.user_pool_id.is_none() {
        let provider = MemoryIdentityProvider::new();
        let mut attributes = Attributes::new();
        attributes.insert(ATTR_NAME.to_string(), "Local Admin".to_string());
        attributes.insert(ATTR_IS_ADMIN.to_string(), "true".to_string());
        provider.seed_user(LOCAL_ADMIN, attributes, true).await;
        info!("using the in-memory identity provider");
        return Ok(Arc::new(provider));
    }

    let client = CognitoClient::new(config.clone()).context("Could not build the provider client")?;
    Ok(Arc::new(client))
}

/// Execute the console action.
/// # Errors
/// Returns an error if the provider client cannot be built or the terminal
/// cannot be read.
pub async fn execute(args: Args) -> Result<()> {
    let config = Arc::new(args.app.clone());
    let local = args.local || config.user_pool_id.is_none();
    let provider = provider(&args, &config).await?;
    let store = Arc::new(MemoryTodoStore::new());

    let mut shell = Shell::new(config.clone(), provider, store, args.locale.clone());
    shell.start().await;

    let mut prompt = Prompt::new();

    loop {
        render(&shell);
        let actions = shell.reachable_actions();
        for (index, action) in actions.iter().enumerate() {
            println!("  {}) {action}", index + 1);
        }
        println!("  q) quit");

        let Some(choice) = prompt.ask("Choose").await? else {
            break;
        };
        if choice.eq_ignore_ascii_case("q") {
            break;
        }
        let Some(action) = choice
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| actions.get(n).copied())
        else {
            println!("Unknown choice");
            continue;
        };

        debug!(%action, "console action");
        let keep_going = match action {
            Action::SignIn => sign_in(&mut shell, &mut prompt, local, &config).await?,
            Action::ViewProfile => {
                profile(&shell);
                true
            }
            Action::ViewTokens => {
                tokens(&mut shell);
                true
            }
            Action::ManageTodos => manage_todos(&mut shell, &mut prompt).await?,
            Action::CreateUser => create_user(&mut shell, &mut prompt, &config).await?,
            Action::SignOut => {
                if shell.sign_out().await.is_ok() {
                    println!("Signed out");
                }
                if let Some(url) = shell.sign_out_url() {
                    println!("Open this URL to end the browser session:\n  {url}");
                }
                true
            }
        };
        if !keep_going {
            break;
        }
    }

    Ok(())
}

fn render(shell: &Shell) {
    println!();
    match shell.view() {
        ShellView::Loading => println!("Loading..."),
        ShellView::SignedOut { summary } => {
            println!("Not signed in");
            for (label, value) in summary {
                println!("  {label}: {value}");
            }
        }
        ShellView::SignedIn {
            identity,
            role,
            notice,
        } => {
            let name = identity.attribute(ATTR_NAME).unwrap_or(&identity.username);
            println!("Signed in as {name} ({role})");
            if let Some(notice) = notice {
                println!("  {notice}");
            }
        }
    }
    if let Some(error) = shell.error() {
        println!("  Error: {error}");
    }
}

async fn sign_in(
    shell: &mut Shell,
    prompt: &mut Prompt,
    local: bool,
    config: &AppConfig,
) -> Result<bool> {
    let Ok(redirect) = shell.sign_in().await else {
        return Ok(true);
    };

    println!("Open this URL to sign in:\n  {}", redirect.url);
    if local {
        let callback = config
            .oauth
            .redirect_sign_in
            .as_deref()
            .unwrap_or(LOCAL_CALLBACK);
        println!(
            "Local provider: paste {callback}?code=<username>&state={} (try {LOCAL_ADMIN})",
            redirect.state
        );
    }

    let Some(callback) = prompt.ask("Callback URL").await? else {
        shell.abandon_sign_in(None).await;
        return Ok(false);
    };
    match Url::parse(&callback) {
        Ok(url) => {
            if shell.complete_sign_in(&url).await.is_ok() {
                println!("Signed in");
            }
        }
        Err(err) => {
            shell
                .abandon_sign_in(Some(format!("Invalid callback URL: {err}")))
                .await;
        }
    }
    Ok(true)
}

fn profile(shell: &Shell) {
    if let ShellView::SignedIn { identity, role, .. } = shell.view() {
        println!("Username: {}", identity.username);
        println!("Role:     {role}");
        for (name, value) in &identity.attributes {
            println!("  {name} = {value}");
        }
    }
}

fn tokens(shell: &mut Shell) {
    match shell.id_token() {
        Some(token) => println!("ID token:\n{}", token.expose_secret()),
        None => println!("No tokens, sign in again"),
    }
}

async fn manage_todos(shell: &mut Shell, prompt: &mut Prompt) -> Result<bool> {
    loop {
        // Let the subscription deliver the latest snapshot before rendering.
        tokio::task::yield_now().await;
        let todos = shell.todos();
        if todos.is_empty() {
            println!("No todos");
        }
        for (index, todo) in todos.iter().enumerate() {
            println!("  {}) {}", index + 1, todo.content.as_deref().unwrap_or("(empty)"));
        }

        let Some(input) = prompt.ask("add <text> | delete <n> | back").await? else {
            return Ok(false);
        };
        let (command, rest) = input.split_once(' ').unwrap_or((input.as_str(), ""));
        match command {
            "add" => {
                let content = Some(rest.trim().to_string()).filter(|c| !c.is_empty());
                if let Err(err) = shell.add_todo(content).await {
                    println!("Error: {err}");
                }
            }
            "delete" => {
                let target = rest
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| todos.get(n));
                match target {
                    Some(todo) => {
                        if let Err(err) = shell.remove_todo(todo.id).await {
                            println!("Error: {err}");
                        }
                    }
                    None => println!("Unknown todo"),
                }
            }
            "back" | "" => return Ok(true),
            _ => println!("Unknown command"),
        }
    }
}

async fn create_user(shell: &mut Shell, prompt: &mut Prompt, config: &AppConfig) -> Result<bool> {
    let Some(console) = shell.admin_console() else {
        println!("{}", crate::shell::NON_ADMIN_NOTICE);
        return Ok(true);
    };
    let workflow = console.registration();

    if matches!(
        workflow.phase(),
        RegistrationPhase::Complete { .. } | RegistrationPhase::Failed { .. }
    ) {
        workflow.reset();
    }

    if matches!(workflow.phase(), RegistrationPhase::Idle) {
        let Some(email) = prompt.ask("Email").await? else {
            return Ok(false);
        };
        let Some(name) = prompt.ask("Display name").await? else {
            return Ok(false);
        };
        let Some(password) = prompt.ask_secret("Password").await? else {
            return Ok(false);
        };
        let Some(admin) = prompt.ask("Administrator? [y/N]").await? else {
            return Ok(false);
        };

        let request = RegistrationRequest::new(email, name, password)
            .with_admin(admin.eq_ignore_ascii_case("y"))
            .with_tenant_id(config.tenant_id.clone());

        if let Err(err) = workflow.submit_registration(request).await {
            println!("Error: {err}");
            return Ok(true);
        }
        if let Some(notice) = workflow.notice() {
            println!("{notice}");
        }
    }

    while let RegistrationPhase::PendingConfirmation { username, error, .. } = workflow.phase() {
        if let Some(error) = error {
            println!("Error: {error}");
        }
        let label = format!("Confirmation code for {username} (resend | back)");
        let Some(code) = prompt.ask(&label).await? else {
            return Ok(false);
        };
        match code.as_str() {
            "back" => return Ok(true),
            "resend" => match workflow.resend_confirmation_code().await {
                Ok(_) => {
                    if let Some(notice) = workflow.notice() {
                        println!("{notice}");
                    }
                }
                Err(err) => println!("Error: {err}"),
            },
            _ => match workflow.confirm_registration(&code).await {
                Ok(ConfirmOutcome::Complete { .. } | ConfirmOutcome::NextStep(_)) => {
                    if let Some(notice) = workflow.notice() {
                        println!("{notice}");
                    }
                }
                Err(err) => debug!("confirmation failed: {err}"),
            },
        }
    }

    Ok(true)
}
