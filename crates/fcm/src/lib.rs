//! Push relay client.
//!
//! The companion never talks to FCM or APNs directly; it POSTs one batched
//! request per evaluation pass to the relay, which owns the service
//! credentials and fans the payloads out.

use std::time::Duration;

use tracing::{debug, info, warn};

use printwatch_protocol::push::PushRequest;

const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the push relay client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay error {status}: {body}")]
    Relay { status: u16, body: String },
}

/// Client for one relay endpoint, shared by all printers of an installation.
#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    base_url: String,
}

impl PushClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(PUSH_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    /// Submits one batched request. Delivery is at-most-once: the caller
    /// logs and drops errors instead of retrying.
    pub async fn push(&self, request: &PushRequest) -> Result<(), Error> {
        info!(
            devices = request.device_requests.len(),
            "submitting notifications to the push relay"
        );
        let url = format!("{}/companion/v2/update", self.base_url);
        let resp = self.http.post(&url).json(request).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body, "push relay rejected the request");
            return Err(Error::Relay {
                status: status.as_u16(),
                body,
            });
        }

        debug!("push relay accepted the request");
        Ok(())
    }
}
