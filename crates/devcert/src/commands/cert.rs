use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use devcert_lifecycle::{CertLifecycle, RenewalDriver};

use crate::format;

pub fn new(
    lifecycle: &CertLifecycle,
    common_name: Option<&str>,
    force: bool,
    json: bool,
) -> anyhow::Result<()> {
    let outcome = lifecycle.new_certificate(common_name, force)?;
    if json {
        println!("{}", format::issue_json(&outcome));
    } else {
        format::issue_line(&outcome);
    }
    Ok(())
}

pub fn sign(lifecycle: &CertLifecycle, csr: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let path = lifecycle.sign_csr(csr)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "certificate": path.display().to_string() })
        );
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

pub fn show(lifecycle: &CertLifecycle, cert: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let chain = lifecycle.show(cert)?;
    let path = cert.unwrap_or(lifecycle.paths().cert.as_path());
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&format::chain_json(path, &chain))?
        );
    } else {
        format::chain_detail(path, &chain);
    }
    Ok(())
}

pub fn delete(lifecycle: &CertLifecycle, json: bool) -> anyhow::Result<()> {
    let removed = lifecycle.delete();
    if json {
        let paths: Vec<String> = removed.iter().map(|p| p.display().to_string()).collect();
        println!("{}", serde_json::json!({ "removed": paths }));
    } else {
        for path in &removed {
            println!("Removed {}", path.display());
        }
    }
    Ok(())
}

/// One check, or a loop every `interval` seconds.
pub fn renew(lifecycle: &CertLifecycle, interval: Option<u64>, json: bool) -> anyhow::Result<()> {
    match interval {
        None => {
            let outcome = RenewalDriver::new(lifecycle, Duration::ZERO).tick()?;
            if json {
                println!("{}", format::renewal_json(&outcome));
            } else {
                format::renewal_line(&outcome);
            }
        }
        Some(secs) => {
            let interval = Duration::from_secs(secs.max(1));
            let shutdown = AtomicBool::new(false);
            RenewalDriver::new(lifecycle, interval).run(&shutdown);
        }
    }
    Ok(())
}

pub fn status(lifecycle: &CertLifecycle, json: bool) -> anyhow::Result<()> {
    let report = lifecycle.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        format::status_detail(&report);
    }
    Ok(())
}
