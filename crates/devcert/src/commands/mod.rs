//! CLI command handlers.
//!
//! Each handler receives a fully wired [`CertLifecycle`] and prints its
//! result to stdout; diagnostics go through `tracing` to stderr.

pub mod cert;

use devcert_lifecycle::CertLifecycle;

use crate::cli::{Cli, Command};

pub fn dispatch(cli: &Cli, lifecycle: &CertLifecycle) -> anyhow::Result<()> {
    match &cli.command {
        Command::New { common_name, force } => {
            cert::new(lifecycle, common_name.as_deref(), *force, cli.json)
        }
        Command::Sign { csr } => cert::sign(lifecycle, csr.as_deref(), cli.json),
        Command::Show { cert: path } => cert::show(lifecycle, path.as_deref(), cli.json),
        Command::Delete => cert::delete(lifecycle, cli.json),
        Command::Renew { interval } => cert::renew(lifecycle, *interval, cli.json),
        Command::Status => cert::status(lifecycle, cli.json),
    }
}
