use clap::Parser;
use dialect_proxy::{build_router, AppState, ProxyConfig, SharedJournal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dialect-proxy",
    about = "Claude-facing proxy that speaks Claude, OpenAI or Gemini upstream",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Request journal path (JSONL)
    #[arg(long, default_value = "dialect-proxy.jsonl")]
    journal: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialect_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. dialect-proxy.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/dialect-proxy/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/dialect-proxy/config.toml");
            println!("     ~/.config/dialect-proxy/config.toml");
        }
        println!("  3. ~/.dialect-proxy.toml");
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref provider) = cli.provider {
        config.provider.name = provider.clone();
        if let Some(preset) = dialect_proxy::providers::ProviderPreset::from_name(provider) {
            if config.provider.base_url.is_none() {
                config.provider.base_url = Some(preset.base_url.to_string());
            }
            config.provider.api_key_env = preset.default_api_key_env.to_string();
            config.provider.format = Some(preset.format);
        }
    }

    let journal = SharedJournal::new(&cli.journal)?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    // fails fast on a missing key or unknown provider
    let state = Arc::new(AppState::new(config.clone(), client, journal)?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %config.provider.name,
        base_url = %state.routing.effective_base_url(),
        upstream = ?state.dialect.format(),
        port = config.port,
        redirects = config.models.len(),
        journal = %cli.journal.display(),
        "Starting dialect-proxy"
    );

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("Point clients at ANTHROPIC_BASE_URL=http://localhost:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
