//! Readiness aggregation for `/ready`.
//!
//! `/ready` always answers 200; the body carries `ready: bool` plus a
//! per-check breakdown so probes and humans see the same picture.

use std::time::Duration;

use serde_json::json;

/// Probe an HTTP health endpoint. Anything 2xx counts as healthy.
pub async fn check_http_health(url: &str) -> (bool, String) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
    {
        Ok(client) => client,
        Err(e) => return (false, format!("{url} client error: {e}")),
    };

    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => (true, format!("{url} healthy")),
        Ok(response) => (
            false,
            format!("{url} unhealthy status={}", response.status().as_u16()),
        ),
        Err(e) => (false, format!("{url} unreachable: {e}")),
    }
}

/// Fold named checks into the `/ready` body.
pub fn summarize_checks(checks: &[(&str, (bool, String))]) -> serde_json::Value {
    let ready = checks.iter().all(|(_, (ok, _))| *ok);
    let details: serde_json::Map<String, serde_json::Value> = checks
        .iter()
        .map(|(name, (ok, detail))| {
            (
                name.to_string(),
                json!({ "ok": ok, "detail": detail }),
            )
        })
        .collect();
    json!({ "ready": ready, "checks": details })
}
