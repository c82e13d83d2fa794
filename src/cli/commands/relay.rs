use clap::{Arg, ArgAction, Command};

pub const ARG_PORT: &str = "port";
pub const ARG_SENDER: &str = "sender";
pub const ARG_MAIL_ENDPOINT: &str = "mail-endpoint";
pub const ARG_MAIL_API_KEY: &str = "mail-api-key";
pub const ARG_REQUIRE_DELEGATION: &str = "require-delegation";
pub const ARG_ALLOWED_ORIGIN: &str = "allowed-origin";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("SIGNET_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SENDER)
                .long(ARG_SENDER)
                .help("Verified sender address")
                .env("SIGNET_SENDER")
                .required(true),
        )
        .arg(
            Arg::new(ARG_MAIL_ENDPOINT)
                .long(ARG_MAIL_ENDPOINT)
                .help("Mail gateway URL; messages are only logged when absent")
                .env("SIGNET_MAIL_ENDPOINT")
                .requires(ARG_MAIL_API_KEY),
        )
        .arg(
            Arg::new(ARG_MAIL_API_KEY)
                .long(ARG_MAIL_API_KEY)
                .help("Service credential for the mail gateway")
                .env("SIGNET_MAIL_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_REQUIRE_DELEGATION)
                .long(ARG_REQUIRE_DELEGATION)
                .help("Refuse to send with the service credential when the credential exchange fails")
                .env("SIGNET_REQUIRE_DELEGATION")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGIN)
                .long(ARG_ALLOWED_ORIGIN)
                .help("Frontend origin allowed by CORS, any origin when absent")
                .env("SIGNET_ALLOWED_ORIGIN"),
        )
}
