use std::error::Error;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use distributed_chat::config::{self, AppConfig, TransportKind};
use distributed_chat::network::{ChatTransport, LinkTransport};
use distributed_chat::simulation::SimulationTransport;
use distributed_chat::storage::{HistoryDatabase, ensure_data_dir};
use distributed_chat::ui::ChatApp;
use distributed_chat::{ChatController, ChatUser, ControllerConfig};

#[derive(Parser)]
#[command(
    name = "distributed-chat",
    version,
    about = "Serverless mesh chat over gossip"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Display name, overrides the stored one
    #[arg(long)]
    name: Option<String>,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone)]
enum Mode {
    /// Talk to nearby peers directly (mDNS + TCP)
    Link {
        /// Multiaddr to listen on
        #[arg(long)]
        listen: Option<String>,
        /// Extra peer multiaddrs to dial
        #[arg(long)]
        dial: Vec<String>,
    },
    /// Join a simulation server instead of a real network
    Simulation {
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    apply_mode(&mut app_config, cli.mode);

    ensure_data_dir(&app_config.data_dir)?;
    let history = HistoryDatabase::open(app_config.history_path())?;
    let fallback = ChatUser::new(
        app_config
            .name
            .clone()
            .unwrap_or_else(|| ChatUser::default().name),
    );
    let mut me = history.load_or_create_identity(fallback)?;
    if let Some(name) = cli.name {
        me.name = name;
        history.save_identity(&me)?;
    }
    log::info!("Starting as {} ({})", me.name, me.id);

    let transport: Arc<dyn ChatTransport> = match app_config.transport {
        TransportKind::Link => {
            let link = LinkTransport::new(app_config.link_config()?)?;
            log::info!("Local peer id: {}", link.local_peer_id());
            Arc::new(link)
        }
        TransportKind::Simulation => {
            Arc::new(SimulationTransport::connect(&app_config.simulation_url, &me).await?)
        }
    };

    // Everything below is wired before the transport starts delivering.
    let controller = ChatController::with_history(
        transport.clone(),
        me,
        ControllerConfig {
            replay_on_connect: app_config.replay_on_connect,
        },
        history.load_messages()?,
    );
    log::info!("Loaded {} messages from history", controller.message_count());

    let history = Arc::new(Mutex::new(history));
    if app_config.persist_history {
        let store = history.clone();
        controller.on_add_chat_message(move |message| {
            let db = store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(err) = db.save_message(message) {
                log::warn!("Failed to persist message {}: {err}", message.id);
            }
        });
    }

    let app = ChatApp::new(controller, transport.as_ref()).with_history(history);
    transport.start();
    app.run().await?;
    Ok(())
}

fn apply_mode(app_config: &mut AppConfig, mode: Option<Mode>) {
    match mode {
        Some(Mode::Link { listen, dial }) => {
            app_config.transport = TransportKind::Link;
            if let Some(listen) = listen {
                app_config.listen_addr = listen;
            }
            app_config.peers.extend(dial);
        }
        Some(Mode::Simulation { url }) => {
            app_config.transport = TransportKind::Simulation;
            if let Some(url) = url {
                app_config.simulation_url = url;
            }
        }
        None => {}
    }
}
