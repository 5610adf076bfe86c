use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logsnarf::api::{self, AppState};
use logsnarf::cli;
use logsnarf::config::{self, BackendKind, Config, LogFormat};
use logsnarf::credentials::file::FileBackend;
use logsnarf::credentials::postgres::PgCredentialBackend;
use logsnarf::credentials::{CredentialBackend, StoredCredential};
use logsnarf::destination::HttpWriterFactory;
use logsnarf::ingest::{self, Pipeline};
use logsnarf::metrics::Metrics;
use logsnarf::models::credential::DestinationType;
use logsnarf::resolver::Resolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg);

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Resolve { token }) => resolve_command(cfg, &token).await,
        Some(cli::Commands::Parse { file }) => parse_command(&file).await,
        Some(cli::Commands::Credential { command }) => credential_command(cfg, command).await,
        None => run_server(cfg, None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "logsnarf=info,tower_http=info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    match cfg.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_backend(cfg: &Config) -> anyhow::Result<Arc<dyn CredentialBackend>> {
    match cfg.backend {
        BackendKind::Postgres => {
            tracing::info!("Connecting to credential database...");
            let backend = PgCredentialBackend::connect(
                &cfg.database_url,
                &cfg.credentials_table,
                cfg.backend_timeout,
            )
            .await?;
            Ok(Arc::new(backend))
        }
        BackendKind::File => Ok(Arc::new(FileBackend::from_yaml_file(&cfg.credentials_file)?)),
    }
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let metrics = Metrics::new()?;
    let backend = build_backend(&cfg).await?;

    let resolver = Resolver::new(backend, cfg.resolver_config()).with_metrics(metrics.clone());
    tracing::info!(
        backend = resolver.backend_kind(),
        capacity = cfg.cache_capacity.get(),
        ttl_secs = cfg.cache_ttl.map(|t| t.as_secs()),
        coalesce = cfg.coalesce_misses,
        "credential resolver ready"
    );

    let writers = HttpWriterFactory::new(Duration::from_secs(30), 3)?;
    let pipeline =
        Pipeline::new(Arc::new(resolver), Arc::new(writers)).with_metrics(metrics.clone());

    let state = Arc::new(AppState { pipeline, metrics });
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("logsnarf listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn resolve_command(cfg: Config, token: &str) -> anyhow::Result<()> {
    let backend = build_backend(&cfg).await?;
    let resolver = Resolver::new(backend, cfg.resolver_config());
    let creds = resolver.resolve(token).await?;

    println!("Credentials resolved:");
    println!("  Name:        {}", creds.name);
    println!("  Destination: {}", creds.destination_type);
    println!(
        "  Host:        {}",
        creds.secrets.host().unwrap_or_else(|| "-".into())
    );
    println!("  Fetched:     {}", creds.fetched_at.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

async fn parse_command(file: &str) -> anyhow::Result<()> {
    let body = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file))?;
    let (points, report) = ingest::extract(&body);

    for p in &points {
        print!("{}", p.to_line_protocol());
    }
    eprintln!(
        "{} lines, {} metrics, {} unparsed, {} without values",
        report.lines,
        points.len(),
        report.unparsed,
        report.skipped
    );
    Ok(())
}

async fn credential_command(cfg: Config, cmd: cli::CredentialCommands) -> anyhow::Result<()> {
    if cfg.backend != BackendKind::Postgres {
        anyhow::bail!("credential management requires the postgres backend");
    }
    let db = PgCredentialBackend::connect(
        &cfg.database_url,
        &cfg.credentials_table,
        cfg.backend_timeout,
    )
    .await?;

    match cmd {
        cli::CredentialCommands::Add {
            token,
            name,
            destination_type,
            url,
        } => {
            if name.trim().is_empty() {
                anyhow::bail!("name must not be empty");
            }
            let kind: DestinationType = destination_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            url::Url::parse(&url).context("invalid destination url")?;

            db.migrate().await?;
            db.upsert(&StoredCredential {
                token: token.clone(),
                name: name.clone(),
                destination_type: kind.to_string(),
                secrets: [("url".to_string(), url)].into(),
            })
            .await?;
            println!("Credentials stored:");
            println!("  Token: {}", token);
            println!("  Name:  {}", name);
            println!("  Type:  {}", kind);
        }
        cli::CredentialCommands::Remove { token } => {
            if db.remove(&token).await? {
                println!("Credentials removed.");
            } else {
                println!("Token not found.");
            }
        }
    }
    Ok(())
}
