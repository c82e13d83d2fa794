//! Identity provider settings shared by `serve` and `console`.

use clap::{Arg, Command};

pub const ARG_REGION: &str = "region";
pub const ARG_USER_POOL_ID: &str = "user-pool-id";
pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_IDENTITY_POOL_ID: &str = "identity-pool-id";
pub const ARG_OAUTH_DOMAIN: &str = "oauth-domain";
pub const ARG_SCOPES: &str = "scopes";
pub const ARG_REDIRECT_SIGN_IN: &str = "redirect-sign-in";
pub const ARG_REDIRECT_SIGN_OUT: &str = "redirect-sign-out";
pub const ARG_RESPONSE_TYPE: &str = "response-type";
pub const ARG_TENANT_ID: &str = "tenant-id";
pub const ARG_USER_POOL_ENDPOINT: &str = "user-pool-endpoint";
pub const ARG_IDENTITY_POOL_ENDPOINT: &str = "identity-pool-endpoint";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REGION)
                .long(ARG_REGION)
                .help("Identity provider region, example: ap-northeast-1")
                .env("SIGNET_REGION"),
        )
        .arg(
            Arg::new(ARG_USER_POOL_ID)
                .long(ARG_USER_POOL_ID)
                .help("User pool id")
                .env("SIGNET_USER_POOL_ID"),
        )
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("User pool app client id")
                .env("SIGNET_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_IDENTITY_POOL_ID)
                .long(ARG_IDENTITY_POOL_ID)
                .help("Identity pool id used for delegated credentials")
                .env("SIGNET_IDENTITY_POOL_ID"),
        )
        .arg(
            Arg::new(ARG_OAUTH_DOMAIN)
                .long(ARG_OAUTH_DOMAIN)
                .help("Hosted sign-in domain")
                .env("SIGNET_OAUTH_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_SCOPES)
                .long(ARG_SCOPES)
                .help("Comma separated OAuth scopes")
                .env("SIGNET_SCOPES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_REDIRECT_SIGN_IN)
                .long(ARG_REDIRECT_SIGN_IN)
                .help("Redirect URI after sign-in")
                .env("SIGNET_REDIRECT_SIGN_IN"),
        )
        .arg(
            Arg::new(ARG_REDIRECT_SIGN_OUT)
                .long(ARG_REDIRECT_SIGN_OUT)
                .help("Redirect URI after sign-out")
                .env("SIGNET_REDIRECT_SIGN_OUT"),
        )
        .arg(
            Arg::new(ARG_RESPONSE_TYPE)
                .long(ARG_RESPONSE_TYPE)
                .help("OAuth response type")
                .default_value(crate::config::DEFAULT_RESPONSE_TYPE)
                .env("SIGNET_RESPONSE_TYPE"),
        )
        .arg(
            Arg::new(ARG_TENANT_ID)
                .long(ARG_TENANT_ID)
                .help("Tenant id assigned to users created from the admin console")
                .default_value(crate::config::DEFAULT_TENANT_ID)
                .env("SIGNET_TENANT_ID"),
        )
        .arg(
            Arg::new(ARG_USER_POOL_ENDPOINT)
                .long(ARG_USER_POOL_ENDPOINT)
                .help("Override the user pool API endpoint")
                .env("SIGNET_USER_POOL_ENDPOINT")
                .hide(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_POOL_ENDPOINT)
                .long(ARG_IDENTITY_POOL_ENDPOINT)
                .help("Override the identity pool API endpoint")
                .env("SIGNET_IDENTITY_POOL_ENDPOINT")
                .hide(true),
        )
}
