use clap::Parser;
use dotenvy::dotenv;
use simulation_server::SimulationServer;
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "simulation-server",
    version,
    about = "Relays broadcasts between simulated chat nodes"
)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    log::info!("Starting simulation server...");

    let server = SimulationServer::new();
    let listener = SimulationServer::bind(&cli.addr).await?;

    tokio::select! {
        result = server.serve(listener) => {
            if let Err(err) = result {
                log::error!("Simulation server error: {}", err);
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received shutdown signal, stopping simulation server...");
        }
    }

    log::info!("Final statistics: {} connected nodes", server.node_count());

    Ok(())
}
