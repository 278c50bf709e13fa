//! The top-level control loop: read a frame, parse and classify it, apply it to the
//! store (deriving features and paging on the LIMS path), and acknowledge only once
//! the mutation is confirmed (SPEC_FULL.md §4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::classifier::{Classifier, Label};
use crate::error::AppError;
use crate::features;
use crate::hl7::{self, ParsedMessage};
use crate::pager::PagerClient;
use crate::store::PatientStore;
use crate::wire::{self, FrameOutcome};

pub struct Orchestrator {
    store: PatientStore,
    classifier: Classifier,
    pager: PagerClient,
    mllp_address: String,
}

impl Orchestrator {
    pub fn new(
        store: PatientStore,
        classifier: Classifier,
        pager: PagerClient,
        mllp_address: String,
    ) -> Self {
        Self {
            store,
            classifier,
            pager,
            mllp_address,
        }
    }

    /// Runs until `shutdown` is set, then persists the store and returns. Reconnects
    /// unconditionally on `ReconnectNeeded`; never lets a single bad frame terminate
    /// the loop.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<(), AppError> {
        let mut conn = wire::connect_with_retry(&self.mllp_address).await;

        while !shutdown.load(Ordering::Relaxed) {
            match conn.read_frame().await {
                FrameOutcome::ReconnectNeeded => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    conn = wire::connect_with_retry(&self.mllp_address).await;
                }
                FrameOutcome::Frame(bytes) => {
                    let payload = match std::str::from_utf8(&bytes) {
                        Ok(s) => s,
                        Err(err) => {
                            log::warn!("dropping non-UTF-8 frame: {}", err);
                            continue;
                        }
                    };

                    match self.handle_payload(payload).await {
                        Ok(true) => {
                            if let Err(err) = conn.send_framed(&hl7::build_ack()).await {
                                log::warn!("failed to send ack, will reconnect: {}", err);
                            }
                        }
                        Ok(false) => {
                            log::warn!("post-condition check failed, withholding ack");
                        }
                        Err(err) => {
                            log::warn!("dropping unprocessable frame: {}", err);
                        }
                    }
                }
            }
        }

        log::info!("shutdown requested, persisting store before exit");
        self.store.persist().await?;
        Ok(())
    }

    /// Applies one parsed message to the store. Returns whether the mutation's
    /// post-condition holds (and thus whether an ack should be sent).
    async fn handle_payload(&self, payload: &str) -> Result<bool, AppError> {
        let parsed = hl7::classify_and_parse(payload)?;

        match parsed {
            ParsedMessage::PasAdmit { mrn, age, sex } => {
                self.store.insert_patient(&mrn, age, sex).await?;
                Ok(self.store.get_patient(&mrn).await?.is_some())
            }
            ParsedMessage::PasDischarge { mrn } => {
                self.store.discharge(&mrn).await?;
                Ok(self.store.get_patient(&mrn).await?.is_none())
            }
            ParsedMessage::LimsResult {
                mrn,
                observed_at,
                result,
            } => {
                match self.store.get_history(&mrn).await? {
                    Some(history) => {
                        let features = features::derive(
                            history.patient.age,
                            history.patient.sex,
                            result,
                            observed_at,
                            &history.results,
                        );
                        let label = self.classifier.predict(&features);
                        if label == Label::Positive {
                            // Pager call precedes the insert: minimises alert latency
                            // at the cost of the small risk of paging on a result that
                            // then fails to insert (SPEC_FULL.md §4.7).
                            if let Err(err) = self.pager.page(&mrn).await {
                                log::warn!("pager failed for MRN {}: {}", mrn, err);
                            }
                        }
                    }
                    None => {
                        log::warn!(
                            "LIMS result for unknown or discharged patient {}, skipping prediction",
                            mrn
                        );
                    }
                }

                self.store.insert_result(&mrn, observed_at, result).await?;
                Ok(self.store.result_exists(&mrn, observed_at).await?)
            }
        }
    }
}

/// Installs SIGINT/SIGTERM handlers that flip a shared flag the orchestrator polls
/// between frames, per the redesign note in SPEC_FULL.md §5 (a weak flag, not a
/// mutation of shared context from the handler itself).
pub fn install_shutdown_signal() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));

    let ctrl_c_flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received SIGINT, shutting down");
            ctrl_c_flag.store(true, Ordering::Relaxed);
        }
    });

    #[cfg(unix)]
    {
        let term_flag = flag.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    log::info!("received SIGTERM, shutting down");
                    term_flag.store(true, Ordering::Relaxed);
                }
                Err(err) => log::warn!("failed to install SIGTERM handler: {}", err),
            }
        });
    }

    flag
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn test_orchestrator(dir: &std::path::Path) -> Orchestrator {
        let path = dir.join("patients.db");
        let history = dir.join("history.csv");
        std::fs::write(&history, "mrn,date,result\n").unwrap();
        let store = PatientStore::open(path.to_str().unwrap(), history.to_str().unwrap())
            .await
            .unwrap();
        let classifier = Classifier::load().unwrap();
        let pager = PagerClient::new("http://127.0.0.1:1/page".to_string());
        Orchestrator::new(store, classifier, pager, "unused".to_string())
    }

    #[tokio::test]
    async fn admit_then_discharge_acks_both() {
        let dir = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(dir.path()).await;

        let admit = "MSH|^~\\&|||||20240924153600||ADT^A01|1|P|2.5\rPID|1||722269||DOE^JANE||19891008|F\r";
        assert!(orch.handle_payload(admit).await.unwrap());

        let discharge = "MSH|^~\\&|||||20240924153600||ADT^A03|1|P|2.5\rPID|1||722269\r";
        assert!(orch.handle_payload(discharge).await.unwrap());
    }

    #[tokio::test]
    async fn lims_result_for_unknown_patient_still_inserts_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(dir.path()).await;

        let lims = "MSH|^~\\&|||||20240924153600||ORU^R01|1|P|2.5\rPID|1||54229\rOBR|1||||||20240924153600\rOBX|1|NM|CREAT|1|103.57|umol/L|||||F\r";
        assert!(orch.handle_payload(lims).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_frame_is_rejected_without_ack() {
        let dir = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(dir.path()).await;
        assert!(orch.handle_payload("").await.is_err());
    }

    /// S3 (SPEC_FULL.md §8): an admitted patient with a sharply elevated creatinine
    /// result relative to recent history predicts positive, pages the MRN, and the
    /// result is still inserted (and acked) afterwards.
    #[tokio::test]
    async fn positive_prediction_pages_mrn_then_inserts_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.db");
        let history = dir.path().join("history.csv");
        std::fs::write(&history, "mrn,date,result\n").unwrap();

        let store = PatientStore::open(path.to_str().unwrap(), history.to_str().unwrap())
            .await
            .unwrap();

        let t = NaiveDate::from_ymd_opt(2024, 9, 24)
            .unwrap()
            .and_hms_opt(15, 36, 0)
            .unwrap();
        store.insert_patient("822825", 75, 'M').await.unwrap();
        store
            .insert_result("822825", t - ChronoDuration::days(2), 80.0)
            .await
            .unwrap();

        let classifier = Classifier::load().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            let _ = tx.send(request);
        });

        let pager = PagerClient::new(format!("http://{}/page", addr));
        let orch = Orchestrator::new(store, classifier, pager, "unused".to_string());

        let ts = t.format("%Y%m%d%H%M%S");
        let lims = format!(
            "MSH|^~\\&|||||{ts}||ORU^R01|1|P|2.5\rPID|1||822825\rOBR|1||||||{ts}\rOBX|1|NM|CREAT|1|300.0|umol/L|||||F\r",
        );

        assert!(orch.handle_payload(&lims).await.unwrap());

        let request = rx.await.unwrap();
        assert!(request.contains("822825"), "pager request body should carry the MRN: {request}");

        let history = orch.store.get_history("822825").await.unwrap().unwrap();
        assert!(history.results.iter().any(|r| r.result == 300.0));
    }
}
