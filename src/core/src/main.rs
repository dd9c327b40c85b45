use clap::Parser;
use log::{error, info};
use obs_gateway::configuration::{Args, Config};
use obs_gateway::controller::Controller;
use obs_gateway::logging;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // The log directory comes from the configuration, so it is read before the logger exists.
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match logging::init(args.log_level, config.storage.log_dir.as_deref()) {
        Ok(Some(path)) => info!("Logging to {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Unable to initialise logging: {}", e);
            std::process::exit(1);
        }
    }

    info!("obs-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "OBS endpoint {}:{}, serving on {}:{}",
        config.device.host, config.device.port, config.server.host, config.server.port
    );

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
    info!("Shutdown complete");
}
