pub mod identity;
pub mod logging;
pub mod relay;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const CMD_SERVE: &str = "serve";
pub const CMD_CONSOLE: &str = "console";
pub const ARG_LOCAL: &str = "local";

fn serve() -> Command {
    let command = Command::new(CMD_SERVE).about("Run the notification relay HTTP server");
    let command = relay::with_args(command);
    identity::with_args(command)
}

fn console() -> Command {
    let command = Command::new(CMD_CONSOLE)
        .about("Interactive sign-in, profile, todo and user administration client")
        .arg(
            Arg::new(ARG_LOCAL)
                .long(ARG_LOCAL)
                .help("Use the in-memory identity provider, implied when no user pool is configured")
                .env("SIGNET_LOCAL")
                .action(ArgAction::SetTrue),
        );
    identity::with_args(command)
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("signet")
        .about("Identity lifecycle client and notification relay")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(serve())
        .subcommand(console());

    logging::with_args(command)
}
