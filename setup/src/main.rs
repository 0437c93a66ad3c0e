//! `diarization-server` binary entry point. Loads configuration, wires the
//! adapters, and serves the HTTP app (teacher's `setup/src/app.rs` /
//! `local-run/src/main.rs` are the structural model for this file).

use diarization_configuration::{load_config_fresh, setup_logging};

const DEFAULT_MAX_CONCURRENT_RUNS: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config_fresh()?;
    setup_logging(&config.logging);

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = diarization_setup::build_state(config, DEFAULT_MAX_CONCURRENT_RUNS);

    tracing::info!(%host, %port, "starting diarization-server");
    diarization_http::serve(state, &host, port).await
}
