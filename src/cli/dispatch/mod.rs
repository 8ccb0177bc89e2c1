use crate::cli::{
    actions::{Action, server::Args},
    commands::{ARG_PORT, oidc, session},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let oidc = oidc::Options::parse(matches).context("invalid relying-party arguments")?;
    let session = session::Options::parse(matches).context("invalid session arguments")?;

    Ok(Action::Server(Args {
        port,
        oidc,
        session,
    }))
}
