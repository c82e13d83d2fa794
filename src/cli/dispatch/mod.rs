use crate::{
    cli::{
        actions::{console, server, Action},
        commands::{identity::*, relay::*, ARG_LOCAL, CMD_CONSOLE, CMD_SERVE},
    },
    config::AppConfig,
    relay::RelayConfig,
};
use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use url::Url;

const DEFAULT_LOCALE: &str = "en";

fn string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

/// Build the provider configuration from the shared identity arguments.
#[must_use]
pub fn app_config(matches: &ArgMatches) -> AppConfig {
    let mut config = AppConfig::new();

    if let Some(region) = string(matches, ARG_REGION) {
        config = config.with_region(region);
    }
    if let Some(id) = string(matches, ARG_USER_POOL_ID) {
        config = config.with_user_pool_id(id);
    }
    if let Some(id) = string(matches, ARG_CLIENT_ID) {
        config = config.with_user_pool_client_id(id);
    }
    if let Some(id) = string(matches, ARG_IDENTITY_POOL_ID) {
        config = config.with_identity_pool_id(id);
    }
    if let Some(domain) = string(matches, ARG_OAUTH_DOMAIN) {
        config = config.with_oauth_domain(domain);
    }
    if let Some(scopes) = matches.get_many::<String>(ARG_SCOPES) {
        let scopes = scopes
            .map(|scope| scope.trim().to_string())
            .filter(|scope| !scope.is_empty())
            .collect();
        config = config.with_scopes(scopes);
    }
    if let Some(uri) = string(matches, ARG_REDIRECT_SIGN_IN) {
        config = config.with_redirect_sign_in(uri);
    }
    if let Some(uri) = string(matches, ARG_REDIRECT_SIGN_OUT) {
        config = config.with_redirect_sign_out(uri);
    }
    if let Some(response_type) = string(matches, ARG_RESPONSE_TYPE) {
        config = config.with_response_type(response_type);
    }
    if let Some(tenant_id) = string(matches, ARG_TENANT_ID) {
        config = config.with_tenant_id(tenant_id);
    }
    if let Some(endpoint) = string(matches, ARG_USER_POOL_ENDPOINT) {
        config = config.with_user_pool_endpoint(endpoint);
    }
    if let Some(endpoint) = string(matches, ARG_IDENTITY_POOL_ENDPOINT) {
        config = config.with_identity_pool_endpoint(endpoint);
    }

    config
}

fn server_args(matches: &ArgMatches) -> Result<server::Args> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let sender = string(matches, ARG_SENDER)
        .filter(|sender| !sender.trim().is_empty())
        .context("missing required argument: --sender")?;

    let mail_endpoint = string(matches, ARG_MAIL_ENDPOINT)
        .map(|endpoint| Url::parse(&endpoint))
        .transpose()
        .context("invalid SIGNET_MAIL_ENDPOINT")?;
    let mail_api_key = string(matches, ARG_MAIL_API_KEY).map(SecretString::from);
    if mail_endpoint.is_some() && mail_api_key.is_none() {
        return Err(anyhow!("missing required argument: --{ARG_MAIL_API_KEY}"));
    }

    let app = app_config(matches);
    let require_delegation = matches.get_flag(ARG_REQUIRE_DELEGATION);
    if require_delegation && app.identity_pool_id.is_none() {
        return Err(anyhow!(
            "--{ARG_REQUIRE_DELEGATION} needs --{ARG_IDENTITY_POOL_ID}"
        ));
    }

    Ok(server::Args {
        port,
        relay: RelayConfig::new(sender.trim()).with_require_delegation(require_delegation),
        app,
        mail_endpoint,
        mail_api_key,
        allowed_origin: string(matches, ARG_ALLOWED_ORIGIN),
    })
}

fn locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            lang.split(['_', '.'])
                .next()
                .map(str::to_string)
                .filter(|l| !l.is_empty() && l != "C" && l != "POSIX")
        })
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_SERVE, sub)) => Ok(Action::Server(server_args(sub)?)),
        Some((CMD_CONSOLE, sub)) => Ok(Action::Console(console::Args {
            app: app_config(sub),
            local: sub.get_flag(ARG_LOCAL),
            locale: locale(),
        })),
        _ => Err(anyhow!("missing subcommand")),
    }
}
