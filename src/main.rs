//! api-client: command-line driver for the resilient API client.
//!
//! ```text
//! api-client --config client.toml fetch-config
//! api-client --config client.toml resolve videos
//! api-client --config client.toml get videos index --query pt=0
//! api-client sign https://api.example.com/videos/v1/index --scheme CF
//! api-client --config client.toml burst-cache
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use resilient_api_client::auth::AuthScheme;
use resilient_api_client::config::loader::load_config;
use resilient_api_client::observability::logging::init_logging;
use resilient_api_client::observability::metrics::describe_metrics;
use resilient_api_client::storage::{FileStore, KeyValueStore, MemoryStore};
use resilient_api_client::transport::ReqwestTransport;
use resilient_api_client::{ApiClient, ApiRequest, AuthRequirement, ClientConfig};

#[derive(Parser)]
#[command(name = "api-client")]
#[command(about = "Resilient module-addressed API client", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch Endpoints and Settings from the config server and persist them
    FetchConfig,
    /// Print the current base URL of a module
    Resolve { module: String },
    /// Run a GET request against a module
    Get {
        module: String,
        path: String,
        /// Query parameter as key=value; repeatable
        #[arg(short, long)]
        query: Vec<String>,
        /// Send without the Authentication header
        #[arg(long)]
        no_auth: bool,
    },
    /// Print the Authentication header value for a URL
    Sign {
        url: String,
        #[arg(short, long, default_value = "CF")]
        scheme: String,
    },
    /// Reset the clock skew and refresh Endpoints
    BurstCache,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    init_logging(&config.observability);
    describe_metrics();

    tracing::info!(
        server_url = %config.server.server_url,
        storage = config.storage.path.as_deref().unwrap_or("memory"),
        "Configuration loaded"
    );

    let store: Arc<dyn KeyValueStore> = match &config.storage.path {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let transport = Arc::new(ReqwestTransport::new(&config.timeouts)?);
    let client = ApiClient::from_config(&config, transport, store)?;

    match cli.command {
        Commands::FetchConfig => {
            let result = client
                .server_config()
                .fetch_from_network(true, true, None, true)
                .await;
            match &result.endpoints {
                Some(e) => println!(
                    "endpoints: {} hosts, {} modules, updated {}",
                    e.app_urls.len(),
                    e.modules.len(),
                    e.last_updated_time
                ),
                None => println!("endpoints: unavailable"),
            }
            match &result.settings {
                Some(s) => println!(
                    "settings: {} toggles, updated {}",
                    s.feature_toggles.len(),
                    s.last_update_time
                ),
                None => println!("settings: unavailable"),
            }
        }
        Commands::Resolve { module } => {
            client.bootstrap().await;
            match client.resolve(&module) {
                Some(url) => println!("{url}"),
                None => eprintln!("Error: module '{module}' is not configured"),
            }
        }
        Commands::Get {
            module,
            path,
            query,
            no_auth,
        } => {
            client.bootstrap().await;
            let mut request = ApiRequest::get(module, path);
            for pair in &query {
                let (key, value) = pair.split_once('=').unwrap_or((pair.as_str(), ""));
                request = request.with_query(key, value);
            }
            if no_auth {
                request = request.with_auth(AuthRequirement::None);
            }

            match client.execute(&request).await {
                Ok(response) => print_body(&response.body),
                Err(e) => eprintln!("Error [{}]: {}", e.code(), e.message()),
            }
        }
        Commands::Sign { url, scheme } => {
            let url = Url::parse(&url)?;
            match client.sign(&url, AuthScheme::parse(&scheme)) {
                Some(value) => println!("{value}"),
                None => eprintln!("Error: scheme '{scheme}' produces no header"),
            }
        }
        Commands::BurstCache => {
            let refreshed = client.burst_cache().await;
            println!("burst cache: {}", if refreshed { "refreshed" } else { "failed" });
        }
    }

    Ok(())
}

fn print_body(body: &[u8]) {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(json) => match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{json}"),
        },
        Err(_) => println!("{}", String::from_utf8_lossy(body)),
    }
}
