use clap::Parser;

/// CLI surface, layered over environment variables, layered over defaults.
///
/// Precedence: explicit flag > environment variable > default. `clap`'s `env`
/// attribute gives us the middle tier for free; only `--debug` and `--history`
/// have no natural env equivalent in the spec and are flag-only.
#[derive(Debug, Parser)]
#[command(name = "aki-sentinel", about = "MLLP/HL7 AKI alerting event processor")]
pub struct Cli {
    /// Path to the historical CSV backfill, used only when no snapshot exists yet.
    #[arg(long, default_value = "data/history.csv")]
    pub history: String,

    /// Enable verbose decision/latency logging (raises the default log filter to debug
    /// when RUST_LOG is not set).
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// `host:port` of the upstream MLLP feed.
    #[arg(long, env = "MLLP_ADDRESS", default_value = "0.0.0.0:8440")]
    pub mllp_address: String,

    /// `host:port` of the pager endpoint.
    #[arg(long, env = "PAGER_ADDRESS", default_value = "0.0.0.0:8441")]
    pub pager_address: String,

    /// Path to the on-disk snapshot of the patient store.
    #[arg(long, env = "PATIENTS_DB_PATH", default_value = "data/patients.db")]
    pub store_path: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub history_path: String,
    pub debug: bool,
    pub mllp_address: String,
    pub pager_address: String,
    pub store_path: String,
}

impl Config {
    pub fn load() -> Self {
        let cli = Cli::parse();
        log::debug!("assembled configuration from CLI/env: {:?}", cli);
        Self {
            history_path: cli.history,
            debug: cli.debug,
            mllp_address: cli.mllp_address,
            pager_address: cli.pager_address,
            store_path: cli.store_path,
        }
    }

    pub fn pager_url(&self) -> String {
        format!("http://{}/page", self.pager_address)
    }
}
