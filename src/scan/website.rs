//! Security header check for a single website.
//!
//! The header request is an ordinary command (`curl -I`) run through the
//! execution engine, so it is retried, bounded and recorded like any other.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use super::{Confidence, Finding, FindingKind, ScanOutcome, Severity, excerpt};
use crate::error::AgentError;
use crate::shell::{CommandRunner, ExecutionRequest, quote_arg};

/// Expected headers: (name, severity, https only, suggested fix).
const SECURITY_HEADERS: &[(&str, Severity, bool, &str)] = &[
    (
        "X-Frame-Options",
        Severity::Medium,
        false,
        "Add 'X-Frame-Options: DENY' or 'X-Frame-Options: SAMEORIGIN' header",
    ),
    (
        "Content-Security-Policy",
        Severity::Medium,
        false,
        "Define a Content-Security-Policy that restricts script, style and frame sources",
    ),
    (
        "Strict-Transport-Security",
        Severity::Medium,
        true,
        "Add 'Strict-Transport-Security: max-age=31536000; includeSubDomains' header",
    ),
    (
        "X-Content-Type-Options",
        Severity::Low,
        false,
        "Add 'X-Content-Type-Options: nosniff' header",
    ),
    (
        "Referrer-Policy",
        Severity::Low,
        false,
        "Add 'Referrer-Policy: strict-origin-when-cross-origin' header",
    ),
];

/// Parse `raw` as an `http` or `https` URL with a host.
pub fn validate_target(raw: &str) -> Result<Url, AgentError> {
    let invalid = |message: String| AgentError::InvalidUrl {
        url: raw.to_string(),
        message,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// The header-only request for `url`.
pub fn header_command(url: &Url, timeout: Duration) -> String {
    format!(
        "curl -sS -I -L --max-time {} {}",
        timeout.as_secs().max(1),
        quote_arg(url.as_str())
    )
}

pub struct WebsiteScanner {
    timeout: Duration,
}

impl WebsiteScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Fetch the headers of `url` and report each missing security header.
    /// An unreachable site yields one informational finding.
    pub async fn scan(&self, runner: &CommandRunner, url: &Url) -> Result<ScanOutcome, AgentError> {
        // Extra slack so curl's own --max-time fires before the engine kills it
        let request = ExecutionRequest::new(
            header_command(url, self.timeout),
            self.timeout + Duration::from_secs(5),
        )?;
        let record = runner.run(&request).await;

        let findings = if record.succeeded() {
            interpret_headers(url, record.stdout())
        } else {
            info!(url = %url, exit = %record.final_status(), "header request failed");
            vec![
                Finding::informational(format!("Website not reachable: {url}"))
                    .description(format!(
                        "The header request did not complete (exit {})",
                        record.final_status()
                    ))
                    .evidence(excerpt(record.stderr(), 500))
                    .location(url.as_str())
                    .suggested_fix("Check the URL and network connectivity, then rescan")
                    .confidence(Confidence::High),
            ]
        };

        Ok(ScanOutcome {
            records: vec![record],
            findings,
        })
    }
}

/// Header names present in the final response of a `curl -I -L` dump,
/// lowercased. Earlier redirect responses are ignored.
fn final_response_headers(raw: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("HTTP/") {
            names.clear();
            continue;
        }
        if let Some((name, _)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                names.insert(name.to_ascii_lowercase());
            }
        }
    }
    names
}

/// One finding per expected security header missing from `raw`.
pub(crate) fn interpret_headers(url: &Url, raw: &str) -> Vec<Finding> {
    let present = final_response_headers(raw);
    let is_https = url.scheme() == "https";
    debug!(url = %url, headers = present.len(), "interpreting response headers");

    SECURITY_HEADERS
        .iter()
        .filter(|(_, _, https_only, _)| is_https || !https_only)
        .filter(|(name, ..)| !present.contains(&name.to_ascii_lowercase()))
        .map(|(name, severity, _, fix)| {
            Finding::new(FindingKind::Vulnerability, format!("Missing {name} header"), *severity)
                .description(format!("The website does not set the {name} header"))
                .location(url.as_str())
                .suggested_fix(*fix)
                .confidence(Confidence::High)
        })
        .collect()
}
