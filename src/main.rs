//! ztictl CLI entry point

use ztictl::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(None).unwrap_or_default();
    if let Err(e) = ztictl::logging::init(&config.logging) {
        eprintln!("warning: logging already initialized: {e}");
    }

    if let Err(e) = ztictl::cli::run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
