use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use devcert_lifecycle::ConfigLayer;

#[derive(Parser, Debug)]
#[command(
    name = "devcert",
    version,
    about = "Issue, renew and inspect edge device identity certificates"
)]
pub struct Cli {
    /// Directory holding key, CSR, certificate and CA files
    #[arg(long, global = true, value_name = "DIR")]
    pub basedir: Option<PathBuf>,

    /// Device identity used when no common name is given
    #[arg(long, global = true)]
    pub device_id: Option<String>,

    /// Remote CA host (e.g. "ca.local:8888"); selects the remote backend
    #[arg(long, global = true)]
    pub ca_host: Option<String>,

    /// Signing backend: remote or local
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Renew when less than this much validity remains
    #[arg(long, global = true, value_name = "SECONDS")]
    pub min_validity: Option<i64>,

    /// Lifetime of certificates signed by the local CA
    #[arg(long, global = true, value_name = "SECONDS")]
    pub cert_duration: Option<i64>,

    /// Key algorithm for a generated local CA: rsa4096 or ecdsa-p256
    #[arg(long, global = true)]
    pub ca_key_algorithm: Option<String>,

    /// Config file (default: platform data dir)
    #[arg(long, env = "DEVCERT_CONFIG", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "DEVCERT_LOG", default_value = "warn", global = true)]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "DEVCERT_LOG_FILE", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create key, CSR and certificate unless a usable certificate exists
    New {
        /// Certificate common name (default: device id, then host name)
        common_name: Option<String>,
        /// Delete existing material and start over
        #[arg(long)]
        force: bool,
    },
    /// Sign a CSR (default: the device CSR)
    Sign {
        csr: Option<PathBuf>,
    },
    /// Decode a certificate file (default: the device certificate)
    Show {
        cert: Option<PathBuf>,
    },
    /// Remove device key, CSR and certificate
    Delete,
    /// Renew the certificate if it is close to expiry
    Renew {
        /// Keep running and check every SECONDS
        #[arg(long, value_name = "SECONDS")]
        interval: Option<u64>,
    },
    /// Show lifecycle state and certificate usability
    Status,
}

impl Cli {
    /// Settings given on the command line, highest precedence.
    pub fn config_layer(&self) -> ConfigLayer {
        let force = match &self.command {
            Command::New { force: true, .. } => Some(true),
            _ => None,
        };
        ConfigLayer {
            basedir: self.basedir.clone(),
            device_id: self.device_id.clone(),
            force,
            ca_host: self.ca_host.clone(),
            backend: self.backend.clone(),
            min_validity_seconds: self.min_validity,
            cert_duration_seconds: self.cert_duration,
            ca_key_algorithm: self.ca_key_algorithm.clone(),
            ..ConfigLayer::default()
        }
    }
}
