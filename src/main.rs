use clap::Parser;
use env_logger::Env;
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;

use qumail_km::config::DEFAULT_STORE_PATH;
use qumail_km::{run_km_server, KmState, QkdResult, ServerConfig};

#[derive(Parser)]
#[command(
    name = "qumail-km",
    author,
    version,
    about = "Simulated QKD key manager"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Snapshot file for key persistence
    #[arg(long, conflicts_with = "in_memory")]
    store: Option<PathBuf>,
    /// Keep keys in memory only
    #[arg(long)]
    in_memory: bool,
    /// Start with intrusion simulation enabled
    #[arg(long)]
    intrusion: bool,
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(store) = &self.store {
            config.store_path = Some(store.clone());
        }
        if self.in_memory {
            config.store_path = None;
        } else if config.store_path.is_none() {
            config.store_path = Some(PathBuf::from(DEFAULT_STORE_PATH));
        }
        if self.intrusion {
            config.intrusion_on = true;
        }
    }
}

fn init_logging(level: &str, debug: bool) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

#[tokio::main]
async fn main() -> QkdResult<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;
    init_logging(&config.log_level, cli.debug);

    let addr = config.bind_addr()?;
    log::info!(
        "Starting KM addr={} store={} intrusion={}",
        addr,
        config
            .store_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".to_string()),
        config.intrusion_on
    );
    let state = Arc::new(KmState::from_config(&config)?);
    run_km_server(addr, state).await
}
