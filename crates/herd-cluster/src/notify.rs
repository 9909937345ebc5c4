use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::{error::ClusterError, lifecycle::Lifecycle};

/// Event type every registered listener receives.
pub const EVENT_TYPE_ALL: &str = "all";
pub const EVENT_TYPE_STATUS: &str = "status";

/// Pushes job events as JSON to the HTTP endpoints registered with the lifecycle manager.
#[derive(Clone)]
pub struct EventNotifier {
    http: reqwest::Client,
}

impl EventNotifier {
    pub fn new(timeout: Duration) -> Result<Self, ClusterError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Send a status event for the job to every `status` and `all` endpoint.
    ///
    /// Returns the number of endpoints that accepted the event. Fails only when neither endpoint lookup succeeds.
    pub async fn notify_status(
        &self,
        lifecycle: &dyn Lifecycle,
        training_id: &str,
        user_id: &str,
        status: &str,
    ) -> Result<usize, ClusterError> {
        let urls = endpoints_for(lifecycle, training_id, user_id, EVENT_TYPE_STATUS).await?;
        let payload = json!({ "trainingId": training_id, "status": status });
        Ok(self.post_all(&urls, &payload).await)
    }

    /// POST `payload` to each URL; failures are logged and skipped.
    pub async fn post_all(&self, urls: &[String], payload: &serde_json::Value) -> usize {
        let mut delivered = 0;
        for url in urls {
            match self.http.post(url).json(payload).send().await {
                Ok(resp) => {
                    debug!(%url, status = %resp.status(), "event delivered");
                    delivered += 1;
                }
                Err(e) => warn!(%url, error = %e, "failed to deliver event"),
            }
        }
        delivered
    }
}

/// Endpoints for `event_type` plus the catch-all ones, without duplicates, in lookup order.
pub async fn endpoints_for(
    lifecycle: &dyn Lifecycle,
    training_id: &str,
    user_id: &str,
    event_type: &str,
) -> Result<Vec<String>, ClusterError> {
    let typed = lifecycle.event_endpoints(training_id, user_id, event_type).await;
    let all = lifecycle.event_endpoints(training_id, user_id, EVENT_TYPE_ALL).await;

    let (typed, all) = match (typed, all) {
        (Err(e), Err(_)) => return Err(e),
        (typed, all) => (typed.unwrap_or_default(), all.unwrap_or_default()),
    };

    let mut urls: Vec<String> = Vec::with_capacity(typed.len() + all.len());
    for url in typed.into_iter().chain(all) {
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}
