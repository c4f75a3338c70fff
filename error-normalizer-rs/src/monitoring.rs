//! Metrics for normalized failures and forwarding outcomes.
//!
//! Counters go through the `metrics` facade; nothing is recorded unless the
//! host process installs a recorder.

use metrics::counter;
use tracing::warn;

/// Counts a failure handled by the normalizer
pub fn record_failure(classified: bool, status: u16) {
    let kind = if classified { "classified" } else { "unclassified" };
    counter!("telemetry.normalizer.failures", 1, "kind" => kind, "status" => status.to_string());
}

/// Counts the outcome of a single forward to the monitoring backend
pub fn record_forward(channel: &'static str, sent: bool) {
    if sent {
        counter!("telemetry.forward.sent", 1, "channel" => channel);
    } else {
        counter!("telemetry.forward.failed", 1, "channel" => channel);
    }
}

/// Counts a forward that was discarded at the request boundary
pub fn record_discarded(channel: &'static str, reason: &str) {
    counter!("telemetry.forward.discarded", 1, "channel" => channel);
    warn!(channel = channel, reason = %reason, "Telemetry forward discarded");
}
