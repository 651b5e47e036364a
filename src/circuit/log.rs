//! Telemetry pings over random circuits.

use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::core::{CircuitPool, HttpRequest};

/// Posts a telemetry ping to `endpoint`.
///
/// Each attempt takes a fresh random circuit. Transient failures (no
/// circuit, transport error, bad status) move on to the next attempt; any
/// other error stops the loop. The circuit used for a successful post is
/// destroyed afterwards.
///
/// # Errors
///
/// - The first non-transient error
/// - [`Error::CircuitUnavailable`] after `attempts` transient failures
pub async fn send_log(circuits: &CircuitPool, endpoint: &str, attempts: usize) -> Result<()> {
    let body = json!({ "tor": true });

    for attempt in 0..attempts {
        let circuit = match circuits.take().await {
            Ok(entry) => entry.into_inner(),
            Err(e) if e.is_transient() => {
                debug!(attempt, error = %e, "No circuit for log");
                continue;
            }
            Err(e) => return Err(e),
        };

        let request = HttpRequest::post_json(endpoint, &body)?;

        match circuit.fetch(request).await.and_then(|r| r.error_for_status()) {
            Ok(_) => {
                circuit.destroy().await;
                debug!(attempt, circuit = circuit.id(), "Log sent");
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                warn!(attempt, circuit = circuit.id(), error = %e, "Could not send log");
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::circuit(format!("log not sent after {attempts} attempts")))
}
