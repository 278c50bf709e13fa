use anyhow::{Context, Result};

use aki_sentinel_lib::classifier::Classifier;
use aki_sentinel_lib::config::Config;
use aki_sentinel_lib::orchestrator::{self, Orchestrator};
use aki_sentinel_lib::pager::PagerClient;
use aki_sentinel_lib::store::PatientStore;

/// A single-threaded runtime matches the orchestrator's control flow: one frame is
/// processed to completion (including the pager call and store commit) before the
/// next is read, so there is never a second task in flight to contend for the store
/// (SPEC_FULL.md §5).
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::load();
    init_logging(config.debug);

    log::info!("starting AKI alerting event processor");

    let classifier = Classifier::load().context("failed to load decision tree model")?;
    let store = PatientStore::open(&config.store_path, &config.history_path)
        .await
        .context("failed to open patient store")?;
    let pager = PagerClient::new(config.pager_url());

    let shutdown = orchestrator::install_shutdown_signal();
    let orchestrator = Orchestrator::new(store, classifier, pager, config.mllp_address.clone());

    orchestrator
        .run(shutdown)
        .await
        .context("orchestrator loop exited with an error")?;

    log::info!("shutdown complete");
    Ok(())
}

fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
    }
    builder.init();
}
