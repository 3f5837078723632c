//! Applying the decided outcome of one reconciliation attempt.

use std::time::Duration;

use metrics::counter;
use serde_json::Value as Json;
use tokio::sync::Notify;

use kopatch_core::{verify, Mismatch, Resource};

use crate::issuer::{is_blank, Identity, PatchIssuer};
use crate::logger::ObjectLogger;
use crate::PatchResult;

/// What the handlers decided for one object: a patch and any requested delays.
#[derive(Debug, Clone, Default)]
pub struct ReactionOutcome {
    pub patch: Json,
    pub delays: Vec<Duration>,
}

fn render(mismatches: &[Mismatch]) -> Json {
    Json::Array(mismatches.iter().map(Mismatch::to_json).collect())
}

/// Patch the object, report what did not stick, and hand delays to the scheduler.
///
/// The patch is checked against the main PATCH response, or against the
/// status-call answer for a status-only patch, or else against `body` itself.
/// Verification only ever logs. Errors from the patch call other than 404
/// propagate and fail the attempt; the caller's scheduler owns retries.
pub async fn apply_reaction_outcomes(
    issuer: &PatchIssuer,
    resource: &Resource,
    body: &Json,
    outcome: ReactionOutcome,
    delays: &mut Vec<Duration>,
    logger: &dyn ObjectLogger,
    replenished: &Notify,
) -> PatchResult<()> {
    let ReactionOutcome { patch, delays: requested } = outcome;
    logger.debug(&format!("Patching with: {}", patch));

    if !is_blank(&patch) {
        let observed = issuer.issue(resource, &patch, Identity::Body(body)).await?.observed(body);
        let mismatches = verify(Some(body), &observed, &patch);
        if !mismatches.is_empty() {
            counter!("patch_mismatches_total", mismatches.len() as u64);
            logger.debug(&format!("Patched body does not match with patch: {}", render(&mismatches)));
        }
    }

    if !requested.is_empty() {
        delays.extend(requested);
        replenished.notify_one();
    }
    Ok(())
}
