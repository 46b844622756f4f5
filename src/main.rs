mod cli;

use log::warn;
use pecaja_lookup::config::Config;
use pecaja_lookup::lookup::VehicleLookup;
use pecaja_lookup::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::build_cli();
    let matches = cmd.get_matches();
    let log_level = matches.get_one::<String>("log-level").cloned();
    let version_flag = matches.get_flag("version");

    cli::init_logging(log_level.as_deref());

    if version_flag {
        println!("pecaja-lookup {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Composition root: one cache, limiter and breaker for the process lifetime.
    let service = Config::from_env().and_then(|cfg| {
        VehicleLookup::from_config(cfg).map_err(|e| format!("Failed to build HTTP client: {}", e))
    });
    if let Err(e) = &service {
        warn!("lookup service unavailable: {}", e);
    }

    server::run_stdio_server(service).await?;
    Ok(())
}
