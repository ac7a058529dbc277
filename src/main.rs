use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = pylon::cli::run_cli().await {
        error!("fatal: {e:#}");
        eprintln!("pylon: {e:#}");
        std::process::exit(1);
    }
}
