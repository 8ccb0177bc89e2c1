use clap::{Arg, ArgMatches, Command};

pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PENDING_STATE_TTL_SECONDS: &str = "pending-state-ttl-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub session_ttl_seconds: u64,
    pub pending_state_ttl_seconds: u64,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a TTL is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let session_ttl_seconds = matches
            .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(43_200);
        let pending_state_ttl_seconds = matches
            .get_one::<u64>(ARG_PENDING_STATE_TTL_SECONDS)
            .copied()
            .unwrap_or(600);

        if session_ttl_seconds == 0 {
            anyhow::bail!("--{ARG_SESSION_TTL_SECONDS} must be greater than zero");
        }
        if pending_state_ttl_seconds == 0 {
            anyhow::bail!("--{ARG_PENDING_STATE_TTL_SECONDS} must be greater than zero");
        }

        Ok(Self {
            session_ttl_seconds,
            pending_state_ttl_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Idle lifetime of a browser session and its cookie, in seconds")
                .env("AUTH_OIDC_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PENDING_STATE_TTL_SECONDS)
                .long(ARG_PENDING_STATE_TTL_SECONDS)
                .help("How long a started login or logout may wait for its callback, in seconds")
                .env("AUTH_OIDC_PENDING_STATE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_env() {
        temp_env::with_vars(
            [
                ("AUTH_OIDC_SESSION_TTL_SECONDS", None::<&str>),
                ("AUTH_OIDC_PENDING_STATE_TTL_SECONDS", Some("120")),
            ],
            || {
                let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                let options = Options::parse(&matches);
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.session_ttl_seconds, 43_200);
                    assert_eq!(options.pending_state_ttl_seconds, 120);
                }
            },
        );
    }

    #[test]
    fn zero_ttl_is_rejected() {
        temp_env::with_vars([("AUTH_OIDC_PENDING_STATE_TTL_SECONDS", None::<&str>)], || {
            let matches = with_args(Command::new("test"))
                .get_matches_from(vec!["test", "--session-ttl-seconds", "0"]);
            assert!(Options::parse(&matches).is_err());
        });
    }
}
