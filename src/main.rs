use std::{future::IntoFuture, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use schemaguard::{
    FeatureToggles, FileConfigProvider, GitSchemaSource, GracefulShutdown, HttpClient,
    HttpClientAdapter, HttpHandler, RefreshCoordinator, SchemaRegistry, UpstreamRouter,
    ValidationEngine,
    config::{GatewayConfig, GatewayConfigValidator, loader::load_config},
    core::{Direction, build_generation},
    ports::{
        config_provider::{ConfigProvider, RouteConfig},
        schema_source::SchemaSource,
    },
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration and build the schema index once
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.yaml")]
        config: String,
        /// Pull or clone the schema repository before building
        #[clap(long)]
        sync: bool,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config, sync }) => validate_config_command(&config, sync).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config_provider = Arc::new(
        FileConfigProvider::new(config_path).context("Failed to create config provider")?,
    );
    let config: GatewayConfig = config_provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;

    tracing_setup::init_tracing_with_config(&config.logging.level, config.logging.json)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    tracing::info!("Loaded initial configuration from {config_path}");

    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {}: {}", config_path, e))?;

    // Startup order: source, routes, build (fatal), publish, engine, router
    let source: Arc<dyn SchemaSource> = Arc::new(GitSchemaSource::new(&config.repository));
    source
        .sync()
        .await
        .context("Failed to sync schema repository")?;
    let raw = source
        .load()
        .await
        .context("Failed to read schema repository")?;

    let routes = RouteConfig::from(&config);
    let generation = build_generation(1, raw, &routes)
        .await
        .context("Failed to build initial schema index")?;
    log_generation_summary(
        generation.raw_schemas().len(),
        generation.index(Direction::Request).route_count(),
        generation.index(Direction::Response).route_count(),
    );

    let registry = Arc::new(SchemaRegistry::new(generation));
    let toggles = Arc::new(FeatureToggles::new(routes.flags));
    let engine = Arc::new(ValidationEngine::new(
        registry.clone(),
        config.logging.max_body_log_bytes,
    ));
    let refresh = Arc::new(RefreshCoordinator::new(
        source,
        config_provider.clone(),
        registry,
        toggles.clone(),
        config.repository.access_token.clone(),
        routes.properties,
    ));

    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(Duration::from_secs(config.limits.upstream_timeout_secs))
            .context("Failed to create HTTP client adapter")?,
    );
    let upstreams = Arc::new(UpstreamRouter::new(&config.upstreams));
    for (prefix, url) in &config.upstreams {
        tracing::info!("Configured upstream: {} -> {}", prefix, url);
    }

    spawn_toggle_watcher(config_provider, toggles.clone(), config_path.to_string());

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let app = HttpHandler::new(
        refresh,
        engine,
        toggles,
        upstreams,
        http_client,
        config.limits.max_body_bytes,
    )
    .router();

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("schemaguard listening on {}", addr);
    println!("schemaguard listening on {addr}");

    let server_token = graceful_shutdown.shutdown_token();
    let drain_token = graceful_shutdown.shutdown_token();
    let drain_timeout = graceful_shutdown.drain_timeout();

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = server_token.wait_for_shutdown().await;
        tracing::info!("Shutdown signal received: {:?}", reason);
    })
    .into_future();

    tokio::select! {
        result = server => {
            result.context("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        _ = async move {
            drain_token.wait_for_shutdown().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!("In-flight exchanges did not drain within {:?}", drain_timeout);
        }
    }

    Ok(())
}

fn log_generation_summary(schemas: usize, request_routes: usize, response_routes: usize) {
    tracing::info!(
        schemas,
        request_routes,
        response_routes,
        "Initial schema generation built"
    );
}

/// Reload the validation toggles whenever the configuration file changes.
/// Route mappings are left alone; they only change on a refresh.
fn spawn_toggle_watcher(
    provider: Arc<FileConfigProvider>,
    toggles: Arc<FeatureToggles>,
    config_path: String,
) {
    let Some(mut notify_rx) = provider.watch() else {
        tracing::warn!("Config watch channel already taken; toggles will not live-reload");
        return;
    };
    let debounce = Duration::from_millis(500);

    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");
        while notify_rx.recv().await.is_some() {
            // Editors often write in several steps; settle before reading
            tokio::time::sleep(debounce).await;
            while notify_rx.try_recv().is_ok() {}

            match provider.load_config().await {
                Ok(config) => {
                    if !toggles.store(config.validate) {
                        tracing::debug!("Config file changed, toggles unchanged");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to reload configuration from {}: {:#}. Keeping current toggles.",
                        config_path,
                        e
                    );
                }
            }
        }
        tracing::info!("Config watcher task is shutting down.");
    });
}

/// Validate configuration file, build the schema index once and exit
async fn validate_config_command(config_path: &str, sync: bool) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = GatewayConfigValidator::validate(&config) {
        eprintln!("Configuration validation failed:");
        eprintln!("{e}");
        std::process::exit(1);
    }
    println!("Configuration validation: OK");

    let source = GitSchemaSource::new(&config.repository);
    if sync {
        if let Err(e) = source.sync().await {
            eprintln!("Schema repository sync failed: {e}");
            std::process::exit(1);
        }
    }
    let raw = match source.load().await {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Reading schema repository failed: {e}");
            std::process::exit(1);
        }
    };

    let schema_files = raw.len();
    let routes = RouteConfig::from(&config);
    match build_generation(0, raw, &routes).await {
        Ok(generation) => {
            println!("Schema index build: OK");
            println!();
            println!("Configuration Summary:");
            println!("   - Listen Address: {}", config.listen_addr);
            println!("   - Schema Files: {schema_files}");
            println!(
                "   - Request Routes: {}",
                generation.index(Direction::Request).route_count()
            );
            println!(
                "   - Response Routes: {}",
                generation.index(Direction::Response).route_count()
            );
            println!("   - Upstreams: {}", config.upstreams.len());
            println!(
                "   - Validation: request={} response={}",
                config.validate.request_validation_on, config.validate.response_validation_on
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Schema index build failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# schemaguard configuration

listen_addr: "127.0.0.1:8080"

# Live toggles, re-read whenever this file changes
validate:
  request_on: true
  response_on: false

# method -> dotted path key -> schema file (relative to the repository root)
request:
  post:
    orders: orders/create.json
response:
  get:
    orders: orders/view.json

repository:
  remote_url: "https://git.example.com/team/schemas.git"
  local_path: ./schemas
  # username: bot
  # password: secret
  # branch: main
  access_token: change-me
  sync: true

upstreams:
  "/": "http://localhost:3000"

limits:
  max_body_bytes: 10485760
  upstream_timeout_secs: 30

logging:
  level: info
  json: true
  max_body_log_bytes: 1024
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'schemaguard serve --config {config_path}' to start the server");
    Ok(())
}
