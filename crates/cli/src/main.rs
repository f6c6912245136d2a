//! Main entry point for the wsreg command-line probe
//!
//! Registers one agent with a SIP-over-WebSocket gateway and reports the
//! outcome through the exit status: 0 registered, 1 failed, 2 timed out.

mod instance_file;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wsreg_client_core::{
    RegistrationConfig, RegistrationOutcome, RegistrationSession, SessionEvent,
};

use crate::instance_file::FileInstanceIdStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway WebSocket URL (wss:// or ws://)
    #[arg(short, long, env = "WSREG_URL")]
    url: String,

    /// SIP domain
    #[arg(short, long, env = "WSREG_DOMAIN")]
    domain: String,

    /// Agent identifier (user part of the address-of-record)
    #[arg(short, long, env = "WSREG_AGENT")]
    agent: String,

    /// User-Agent header value
    #[arg(long)]
    user_agent: Option<String>,

    /// Origin header for the WebSocket upgrade
    #[arg(long)]
    origin: Option<String>,

    /// REGISTER expiry in seconds
    #[arg(short, long, default_value = "600")]
    expires: u32,

    /// Seconds to wait for a SIP response
    #[arg(short, long, default_value = "10")]
    timeout: u64,

    /// Keepalive ping interval in seconds
    #[arg(long, default_value = "30")]
    keepalive: u64,

    /// Do not advertise ICE support on the Contact
    #[arg(long)]
    no_ice: bool,

    /// File holding the device instance id
    #[arg(long, default_value = ".wsreg-instance-id")]
    instance_file: PathBuf,

    /// Seconds to keep the registration up after success
    #[arg(long, default_value = "0")]
    hold: u64,
}

impl Args {
    fn registration_config(&self) -> RegistrationConfig {
        let mut config =
            RegistrationConfig::new(self.url.clone(), self.domain.clone(), self.agent.clone())
                .with_expires(self.expires)
                .with_register_timeout(Duration::from_secs(self.timeout))
                .with_keepalive_interval(Duration::from_secs(self.keepalive))
                .with_ice_support(!self.no_ice);
        if let Some(user_agent) = &self.user_agent {
            config = config.with_user_agent(user_agent.clone());
        }
        if let Some(origin) = &self.origin {
            config = config.with_origin(origin.clone());
        }
        config
    }
}

fn exit_code(outcome: &RegistrationOutcome) -> ExitCode {
    match outcome {
        RegistrationOutcome::Registered { .. } => ExitCode::SUCCESS,
        RegistrationOutcome::Failed { .. } => ExitCode::from(1),
        RegistrationOutcome::TimedOut { .. } => ExitCode::from(2),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.registration_config();
    config.validate().context("invalid registration settings")?;

    let store = FileInstanceIdStore::new(&args.instance_file);
    let (session, mut events) = RegistrationSession::from_store(config, &store)
        .context("failed to create registration session")?;
    info!(
        "Instance id {} from {}",
        session.register_params().instance_id,
        store.path().display()
    );

    session.start().context("failed to start registration")?;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Finished(outcome)) => break Some(outcome),
                Some(SessionEvent::StateChanged { previous, current }) => {
                    debug!("Session {} -> {}", previous, current);
                }
                Some(SessionEvent::Log { .. }) => {}
                None => break None,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                session.stop();
                return Ok(ExitCode::from(130));
            }
        }
    };

    let Some(outcome) = outcome else {
        session.stop();
        anyhow::bail!("session ended without an outcome");
    };
    println!("{}", outcome);

    if outcome.is_success() && args.hold > 0 {
        info!("Holding registration for {}s", args.hold);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.hold)) => {}
            _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
        }
    }

    session.stop();
    // Let the close frame go out before the runtime shuts down
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(exit_code(&outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_map_to_config() {
        let args = Args::try_parse_from([
            "wsreg",
            "--url",
            "wss://gw.example.com/ws",
            "--domain",
            "pbx.example.com",
            "--agent",
            "1001",
            "--origin",
            "https://app.example.com",
            "--timeout",
            "5",
            "--no-ice",
        ])
        .unwrap();

        let config = args.registration_config();
        assert_eq!(config.ws_url, "wss://gw.example.com/ws");
        assert_eq!(config.origin.as_deref(), Some("https://app.example.com"));
        assert_eq!(config.register_timeout, Duration::from_secs(5));
        assert_eq!(config.expires, 600);
        assert!(!config.ice_support);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_exit_codes() {
        let timed_out = RegistrationOutcome::TimedOut {
            after: Duration::from_secs(10),
        };
        assert_eq!(
            format!("{:?}", exit_code(&timed_out)),
            format!("{:?}", ExitCode::from(2))
        );
    }
}
