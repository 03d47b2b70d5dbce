//! CLI output formatting, human-readable and JSON.

use std::path::Path;

use devcert_crypto::CertificateInfo;
use devcert_lifecycle::{IssueOutcome, RenewalOutcome, StatusReport};
use serde_json::{json, Value};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn chain_json(path: &Path, chain: &[CertificateInfo]) -> Value {
    let certificates: Vec<Value> = chain
        .iter()
        .map(|cert| {
            json!({
                "subject": cert.subject,
                "issuer": cert.issuer,
                "common_name": cert.common_name,
                "serial": cert.serial,
                "not_before": cert.not_before.to_rfc3339(),
                "not_after": cert.not_after.to_rfc3339(),
                "is_ca": cert.is_ca,
                "fingerprint_sha256": cert.fingerprint,
                "public_key_sha256": cert.public_key_fingerprint,
            })
        })
        .collect();
    json!({
        "path": path.display().to_string(),
        "certificates": certificates,
    })
}

/// Print each certificate of a chain, leaf first.
pub fn chain_detail(path: &Path, chain: &[CertificateInfo]) {
    println!("{}", path.display());
    for (i, cert) in chain.iter().enumerate() {
        let role = match (i, cert.is_ca) {
            (0, false) => "leaf",
            (_, true) => "CA",
            _ => "intermediate",
        };
        println!("  [{i}] {role}");
        if let Some(cn) = &cert.common_name {
            println!("    Common Name: {cn}");
        }
        println!("    Subject:     {}", cert.subject);
        println!("    Issuer:      {}", cert.issuer);
        println!("    Serial:      {}", cert.serial);
        println!("    Not Before:  {}", cert.not_before.format(TIMESTAMP_FORMAT));
        println!("    Not After:   {}", cert.not_after.format(TIMESTAMP_FORMAT));
        println!("    SHA-256:     {}", cert.fingerprint);
        println!("    Key SHA-256: {}", cert.public_key_fingerprint);
    }
}

pub fn issue_json(outcome: &IssueOutcome) -> Value {
    json!({
        "changed": matches!(outcome, IssueOutcome::Issued(_)),
        "certificate": outcome.path().display().to_string(),
    })
}

pub fn issue_line(outcome: &IssueOutcome) {
    match outcome {
        IssueOutcome::AlreadyUsable(path) => {
            println!("Certificate is valid, nothing to do: {}", path.display())
        }
        IssueOutcome::Issued(path) => println!("{}", path.display()),
    }
}

pub fn renewal_json(outcome: &RenewalOutcome) -> Value {
    match outcome {
        RenewalOutcome::Renewed(path) => json!({
            "renewed": true,
            "certificate": path.display().to_string(),
        }),
        RenewalOutcome::NotDue { remaining_secs } => json!({
            "renewed": false,
            "remaining_validity_secs": remaining_secs,
        }),
    }
}

pub fn renewal_line(outcome: &RenewalOutcome) {
    match outcome {
        RenewalOutcome::Renewed(path) => println!("Renewed: {}", path.display()),
        RenewalOutcome::NotDue {
            remaining_secs: Some(secs),
        } => println!("Not due for renewal ({} remaining)", human_duration(*secs)),
        RenewalOutcome::NotDue {
            remaining_secs: None,
        } => println!("Not due for renewal"),
    }
}

pub fn status_detail(report: &StatusReport) {
    println!("Base directory: {}", report.basedir.display());
    println!("Backend:        {}", report.backend);
    println!("State:          {}", report.state);
    println!("Next action:    {}", report.next_action);
    println!("Certificate:    {}", report.usability);
    if let Some(secs) = report.remaining_validity_secs {
        println!(
            "Remaining:      {} (renew below {})",
            human_duration(secs),
            human_duration(report.min_validity_secs as i64)
        );
    }
}

/// Compact duration such as `6d 23h` or `45s`. Negative means expired.
fn human_duration(secs: i64) -> String {
    if secs < 0 {
        return format!("expired {} ago", human_duration(-secs));
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{secs}s"),
        (0, 0, m) => format!("{m}m"),
        (0, h, m) => format!("{h}h {m}m"),
        (d, h, _) => format!("{d}d {h}h"),
    }
}
