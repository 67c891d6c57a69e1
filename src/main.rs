//! Charm process entrypoint: logging setup, startup, and the final wait on
//! the terminal message.

use tracing::Level;

/// Path the deployment mounts the config file at.
const CONF_PATH: &str = "/secret/charm.conf";

/// `CHARM_LOG_LEVEL` selects verbosity. Unrecognized values and an unset
/// variable both mean Warn; Fatal and Panic clamp to Error, the most severe
/// level tracing has.
fn log_level() -> Level {
    match std::env::var("CHARM_LOG_LEVEL").as_deref() {
        Ok("Debug") => Level::DEBUG,
        Ok("Info") => Level::INFO,
        Ok("Warn") => Level::WARN,
        Ok("Error") | Ok("Fatal") | Ok("Panic") => Level::ERROR,
        _ => Level::WARN,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(log_level()).init();

    let done = charm::start(CONF_PATH);
    match done.await {
        Ok(message) => tracing::warn!("{message}"),
        Err(_) => tracing::error!("gateway exited without a terminal message"),
    }
}
