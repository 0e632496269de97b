use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use game_gateway::{
    adapters::{AppState, BroadcastPublisher, HttpClientAdapter, create_router},
    config::{ServerConfig, ServerConfigValidator, loader},
    core::GatewayService,
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::{BackgroundTasks, GracefulShutdown, start_rate_limit_cleanup},
};

/// Upper bound for stopping background tasks once the listener is closed.
const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Human-readable logs instead of JSON
    #[clap(long)]
    pretty_logs: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Write a starter configuration covering the game services
    Init {
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config, &args.log_level, !args.pretty_logs).await,
        None => serve(&args.config, &args.log_level, !args.pretty_logs).await,
    }
}

async fn serve(config_path: &str, log_level: &str, json_logs: bool) -> Result<()> {
    tracing_setup::init_tracing(log_level, json_logs)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {e}"))?;

    tracing::info!(config = %config_path, "Loading configuration");
    let config: ServerConfig = loader::load_config(config_path)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {config_path}"))?;
    let config = Arc::new(config);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("Invalid listen address {}", config.listen_addr))?;

    let gateway = Arc::new(
        GatewayService::new(config.clone()).wrap_err("Invalid service registry")?,
    );
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().wrap_err("Failed to create HTTP client adapter")?);
    let publisher = BroadcastPublisher::default();

    let state = AppState::new(gateway.clone(), http_client, Arc::new(publisher.clone()));
    let hub = state.hub.clone();

    let mut background = BackgroundTasks::new();
    let token = background.token();
    background.track(
        "health_monitor",
        state.health_monitor.clone().start(token.child_token()),
    );
    if gateway.rate_limiter().is_enabled() {
        background.track(
            "rate_limit_cleanup",
            start_rate_limit_cleanup(gateway.rate_limiter().clone(), token.child_token()),
        );
    }
    if config.websocket.enabled {
        background.track(
            "chat_fanout",
            hub.clone()
                .start_chat_fanout(publisher.subscribe(), token.child_token()),
        );
    }

    for endpoint in gateway.endpoints() {
        tracing::info!(
            service = %endpoint.name,
            route_prefix = %endpoint.route_prefix,
            url = %endpoint.url,
            timeout_ms = endpoint.timeout.as_millis() as u64,
            retries = endpoint.max_retries,
            "Service registered"
        );
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {addr}"))?;

    let shutdown = GracefulShutdown::new(Duration::from_secs(config.shutdown_timeout_secs));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await });
    }

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            shutdown.wait_for_shutdown_signal().await;
        }
    });
    let mut server = tokio::spawn(async move { server.await });

    tracing::info!(%addr, services = gateway.endpoints().len(), "Game gateway listening");

    let server_result = tokio::select! {
        result = &mut server => Some(result),
        reason = shutdown.wait_for_shutdown_signal() => {
            tracing::info!(reason = ?reason, "Draining in-flight requests");
            None
        }
    };

    let server_result = match server_result {
        Some(result) => result,
        None => {
            // Upgraded sockets are not part of the HTTP drain.
            hub.close_all().await;
            match shutdown.drain(&mut server).await {
                Some(result) => result,
                None => {
                    tracing::warn!(
                        in_flight = gateway.in_flight(),
                        "Forcing remaining connections closed"
                    );
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    let aborted = background.shutdown(BACKGROUND_STOP_TIMEOUT).await;
    if aborted > 0 {
        tracing::warn!(aborted, "Some background tasks were aborted");
    }

    server_result
        .wrap_err("Server task failed")?
        .wrap_err("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match loader::load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • API Prefix: {}", config.api_prefix);
            let mut names: Vec<_> = config.services.keys().collect();
            names.sort();
            for name in names {
                let service = &config.services[name];
                println!(
                    "   • {name}: {} -> {} (timeout {}, retries {})",
                    config.route_prefix_for(name, service),
                    service.url,
                    service.timeout,
                    service.retries
                );
            }
            println!("   • Rate Limiting: {}", config.rate_limit.enabled);
            println!("   • Health Checks: {}", config.health_check.enabled);
            println!("   • WebSocket: {}", config.websocket.enabled);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all service URLs start with http:// or https://");
            println!("   • Use humantime durations for timeouts (e.g. '10s', '1500ms')");
            println!("   • Verify listen address format (e.g., '0.0.0.0:8080')");
            std::process::exit(1);
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# Game gateway configuration

listen_addr = "0.0.0.0:8080"
api_prefix = "/api/v1"
max_body_bytes = 10485760
shutdown_timeout_secs = 30

# Backend services. Each one is reachable under <api_prefix>/<name> unless
# route_prefix says otherwise.
[services.auth]
url = "http://auth-service:8081"
timeout = "10s"
retries = 2

[services.player]
url = "http://player-service:8082"
timeout = "10s"

[services.world]
url = "http://world-service:8083"
timeout = "15s"

[services.combat]
url = "http://combat-service:8084"
timeout = "5s"
retries = 1

[services.inventory]
url = "http://inventory-service:8085"
timeout = "10s"

[services.guild]
url = "http://guild-service:8086"
timeout = "10s"

[services.chat]
url = "http://chat-service:8087"
timeout = "5s"

[services.analytics]
url = "http://analytics-service:8088"
timeout = "30s"
retries = 0

# <prefix>/health and <prefix>/metrics are mapped to each service's own
# /health and /metrics automatically.
[path_rewrites.prefix]
"/api/v1/player" = "/api/v1/players"

[retry]
base_delay_ms = 500

[circuit_breaker]
failure_threshold = 5
cooldown_secs = 30

[rate_limit]
enabled = true
requests_per_minute = 100
burst = 20
cleanup_interval_secs = 60

# [rate_limit.adaptive]
# max_load = 1000.0

[health_check]
enabled = true
interval_secs = 30
timeout_secs = 5
path = "/health"
unhealthy_threshold = 3

[websocket]
enabled = true
chat_subject = "chat.messages"
outbound_buffer = 64
write_timeout_secs = 10
"#;

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG)
        .await
        .wrap_err("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'game-gateway serve --config {config_path}' to start the gateway");
    Ok(())
}
