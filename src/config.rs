//! Configuration and CLI argument parsing for the SSH gate

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SshGateError};
use crate::ssh::ServeOptions;

/// Default listening port
pub const DEFAULT_PORT: u16 = 2222;

/// Default handshake timeout in seconds (None = wait forever)
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: Option<usize> = Some(30);

/// Default connection limit (None = unlimited)
pub const DEFAULT_MAX_CONNECTIONS: Option<usize> = None;

/// Host key file names looked up in `--host-key-dir`
pub const HOST_KEY_NAMES: &[&str] = &[
    "ssh_host_dsa_key",
    "ssh_host_ecdsa_key",
    "ssh_host_ed25519_key",
    "ssh_host_rsa_key",
];

/// SSH gate CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-gate")]
#[command(version)]
#[command(about = "SSH server front door: host identity, public-key authentication and connection admission")]
pub struct Args {
    /// Port to listen on (all interfaces)
    #[arg(long, default_value = "2222", env = "SSH_GATE_PORT")]
    pub port: u16,

    /// Host private key file (repeatable)
    #[arg(long = "host-key", env = "SSH_GATE_HOST_KEY", value_delimiter = ',')]
    pub host_keys: Vec<PathBuf>,

    /// Directory holding ssh_host_*_key files
    #[arg(long, env = "SSH_GATE_HOST_KEY_DIR")]
    pub host_key_dir: Option<PathBuf>,

    /// authorized_keys file (repeatable)
    #[arg(long = "authorized-keys", env = "SSH_GATE_AUTHORIZED_KEYS", value_delimiter = ',')]
    pub authorized_keys: Vec<PathBuf>,

    /// Handshake timeout in seconds.
    /// Use "none", "0", or negative value to disable.
    /// Default: 30
    #[arg(long, env = "SSH_GATE_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout: Option<String>,

    /// Maximum concurrently handled connections.
    /// Use "none", "0", or negative value to disable the limit.
    /// Default: unlimited
    #[arg(long, env = "SSH_GATE_MAX_CONNECTIONS")]
    pub max_connections: Option<String>,

    /// Seconds to wait for connections to finish on shutdown
    #[arg(long, default_value = "10", env = "SSH_GATE_SHUTDOWN_GRACE")]
    pub shutdown_grace: u64,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening port
    pub port: u16,

    /// Host key files, explicit ones first then those found in the key directory
    pub host_keys: Vec<PathBuf>,

    /// authorized_keys files
    pub authorized_keys: Vec<PathBuf>,

    /// Handshake timeout (None = wait forever)
    pub handshake_timeout: Option<Duration>,

    /// Connection limit (None = unlimited)
    pub max_connections: Option<usize>,

    /// Shutdown grace period
    pub shutdown_grace: Duration,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let host_keys = host_key_paths(&args.host_keys, args.host_key_dir.as_deref());
        let handshake_timeout = parse_limit(
            args.handshake_timeout.as_deref(),
            DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        )
        .map(|secs| Duration::from_secs(secs as u64));
        let max_connections = parse_limit(args.max_connections.as_deref(), DEFAULT_MAX_CONNECTIONS);

        Ok(Config {
            port: args.port,
            host_keys,
            authorized_keys: args.authorized_keys,
            handshake_timeout,
            max_connections,
            shutdown_grace: Duration::from_secs(args.shutdown_grace),
        })
    }

    /// Options for the server built from this configuration
    pub fn serve_options(&self) -> ServeOptions {
        let mut options = ServeOptions::new().with_shutdown_grace(self.shutdown_grace);
        if let Some(timeout) = self.handshake_timeout {
            options = options.with_handshake_timeout(timeout);
        }
        if let Some(limit) = self.max_connections {
            options = options.with_max_connections(limit);
        }
        options
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host_keys.is_empty() && args.host_key_dir.is_none() {
        errors.push("Must provide --host-key or --host-key-dir".to_string());
    }

    for path in &args.host_keys {
        if !path.is_file() {
            errors.push(format!("Host key file not found: {}", path.display()));
        }
    }

    if let Some(ref dir) = args.host_key_dir {
        if !dir.is_dir() {
            errors.push(format!("Host key directory not found: {}", dir.display()));
        } else if host_key_paths(&[], Some(dir)).is_empty() {
            errors.push(format!(
                "No ssh_host_*_key files in {}",
                dir.display()
            ));
        }
    }

    for path in &args.authorized_keys {
        if !path.is_file() {
            errors.push(format!(
                "Authorized keys file not found: {}",
                path.display()
            ));
        }
    }

    if !errors.is_empty() {
        return Err(SshGateError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Resolve host key files: explicit paths, then the well-known names present in `dir`
pub fn host_key_paths(explicit: &[PathBuf], dir: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = explicit.to_vec();
    if let Some(dir) = dir {
        paths.extend(
            HOST_KEY_NAMES
                .iter()
                .map(|name| dir.join(name))
                .filter(|path| path.is_file()),
        );
    }
    paths
}

/// Parse a numeric limit argument
///
/// - "none" (case-insensitive) → None (disabled)
/// - "0" or negative → None (disabled)
/// - positive integer → Some(value)
/// - None (not provided) or garbage → `default`
pub fn parse_limit(value: Option<&str>, default: Option<usize>) -> Option<usize> {
    match value {
        None => default,
        Some(s) => {
            if s.eq_ignore_ascii_case("none") {
                return None;
            }

            match s.trim().parse::<i64>() {
                Ok(n) if n <= 0 => None,
                Ok(n) => Some(n as usize),
                Err(_) => default,
            }
        }
    }
}
