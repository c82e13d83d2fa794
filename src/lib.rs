//! # Signet (identity lifecycle client & notification relay)
//!
//! `signet` drives the identity lifecycle of a small sign-in / sign-up / todo
//! application against a managed identity provider, and relays email requests
//! to a managed email-sending service.
//!
//! ## Identity lifecycle
//!
//! Sign-up -> confirmation -> sign-in -> session/token retrieval -> role
//! derivation -> authorized action. Each workflow is a single discriminated
//! state value:
//!
//! - **Session:** [`identity::SessionState`] is `Unknown`, `Unauthenticated` or
//!   `Authenticated`. Sign-in is redirect based, so nothing held in memory is
//!   trusted across the round trip; the session is re-derived with `resume`.
//! - **Registration:** [`identity::RegistrationPhase`] walks
//!   `Idle -> Submitting -> PendingConfirmation -> Confirming -> Complete`,
//!   with `Failed` on provider rejection. Local validation never reaches the
//!   provider.
//! - **Role:** [`identity::Role`] is derived from the `custom:isAdmin`
//!   attribute on every read and never cached on its own.
//!
//! ## Authorization
//!
//! The [`shell::Shell`] only constructs the user-creation workflow for admin
//! sessions. Standard sessions have no registration state to reach.
//!
//! ## Notification relay
//!
//! `POST /send-email` resolves delegated credentials from the caller's bearer
//! token, falls back to the service credential when the exchange fails, and
//! always answers with a human-readable result string.

pub mod api;
pub mod cli;
pub mod config;
pub mod identity;
pub mod relay;
pub mod shell;
pub mod todos;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
