//! Pager client: best-effort HTTP notification on a positive AKI prediction. Unlike
//! the teacher's HIS uploader this performs no retries — a failed page is logged and
//! must not block acknowledgement of the originating HL7 message (SPEC_FULL.md §4.6).

use std::time::Duration;

use crate::error::PagerError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub struct PagerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl PagerClient {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build pager HTTP client");
        log::debug!("pager client targeting {}", endpoint);
        Self { client, endpoint }
    }

    /// Issues `POST {endpoint}` with the MRN as a plain-text body. Any failure is
    /// returned to the caller for logging only — the orchestrator never retries or
    /// blocks on this call.
    pub async fn page(&self, mrn: &str) -> Result<(), PagerError> {
        log::info!("paging for MRN {}", mrn);
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/plain")
            .body(mrn.to_string())
            .send()
            .await?;

        if response.status().is_success() {
            log::debug!("pager accepted notification for MRN {}", mrn);
            Ok(())
        } else {
            let status = response.status();
            log::error!("pager returned non-success status {} for MRN {}", status, mrn);
            Err(PagerError::Status(status))
        }
    }
}
