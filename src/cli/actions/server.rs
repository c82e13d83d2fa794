use crate::{
    api,
    config::AppConfig,
    relay::{
        credentials::{CredentialExchange, DisabledExchange, IdentityPoolExchange},
        mailer::{HttpMailer, LogMailer, Mailer},
        NotificationRelay, RelayConfig,
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{fmt, sync::Arc};
use tracing::{info, warn};
use url::Url;

pub struct Args {
    pub port: u16,
    pub app: AppConfig,
    pub relay: RelayConfig,
    pub mail_endpoint: Option<Url>,
    pub mail_api_key: Option<SecretString>,
    pub allowed_origin: Option<String>,
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("app", &self.app)
            .field("relay", &self.relay)
            .field("mail_endpoint", &self.mail_endpoint)
            .field("mail_api_key", &self.mail_api_key.as_ref().map(|_| "***"))
            .field("allowed_origin", &self.allowed_origin)
            .finish()
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if a client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let exchange: Arc<dyn CredentialExchange> = if args.app.identity_pool_id.is_some() {
        Arc::new(
            IdentityPoolExchange::new(Arc::new(args.app.clone()))
                .context("Could not build the identity pool client")?,
        )
    } else {
        warn!("no identity pool configured, every message uses the service credential");
        Arc::new(DisabledExchange)
    };

    let mailer: Arc<dyn Mailer> = match (args.mail_endpoint, args.mail_api_key) {
        (Some(endpoint), Some(api_key)) => Arc::new(
            HttpMailer::new(endpoint, api_key).context("Could not build the mail client")?,
        ),
        _ => {
            warn!("no mail endpoint configured, messages are only logged");
            Arc::new(LogMailer)
        }
    };

    let relay = Arc::new(NotificationRelay::new(args.relay, exchange, mailer));

    api::new(args.port, relay, args.allowed_origin).await
}

fn log_startup_args(args: &Args) {
    let mailer = args
        .mail_endpoint
        .as_ref()
        .map_or_else(|| "log only".to_string(), ToString::to_string);
    let pool = args.app.identity_pool_id.as_deref().unwrap_or("disabled");
    let origin = args.allowed_origin.as_deref().unwrap_or("any");

    let mut lines = Vec::new();
    lines.push("Startup configuration:".to_string());
    lines.push(format!("  Version:            {}", env!("CARGO_PKG_VERSION")));
    lines.push(format!("  Commit:             {}", crate::GIT_COMMIT_HASH));
    lines.push(format!("  Listen:             0.0.0.0:{}", args.port));
    lines.push(format!("  Sender:             {}", args.relay.sender()));
    lines.push(format!("  Mail endpoint:      {mailer}"));
    lines.push(format!("  Identity pool:      {pool}"));
    lines.push(format!(
        "  Require delegation: {}",
        args.relay.require_delegation()
    ));
    lines.push(format!("  Allowed origin:     {origin}"));

    info!("{}", lines.join("\n"));
}
