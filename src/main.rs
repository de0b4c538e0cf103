//! softpack-frontend entry point

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use softpack_frontend::{
    server, spawn_refresh_task, ArtefactStore, CatalogError, Catalog, Cli, Commands, Config,
    EnvironmentIndex, NotificationBus,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };
    cli.apply(&mut config);

    init_logging(&config);

    match run(cli.command(), config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            match e.downcast_ref::<CatalogError>() {
                Some(catalog_error) => catalog_error.exit_code(),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn init_logging(config: &Config) {
    let level = if std::env::var_os("DEV").is_some() {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    let mut filter = EnvFilter::from_default_env();
    match format!("softpack_frontend={}", level).parse::<Directive>() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring log level {:?}: {}", level, e),
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    let options = config.clone_options()?;

    tracing::info!("Opening artefact repo {}", options.remote);
    let store = tokio::task::spawn_blocking(move || ArtefactStore::open(&options)).await??;

    match command {
        Commands::Index => {
            let index = tokio::task::spawn_blocking(move || EnvironmentIndex::rebuild(&store))
                .await??;
            println!("{}", serde_json::to_string_pretty(&index)?);
            Ok(())
        }
        Commands::Serve(_) => serve(store, config).await,
    }
}

async fn serve(store: ArtefactStore, config: Config) -> anyhow::Result<()> {
    let bus = NotificationBus::new(config.bus.send_timeout());
    let catalog = Arc::new(Catalog::new(store, bus));

    let initial = Arc::clone(&catalog);
    let index = tokio::task::spawn_blocking(move || initial.reindex()).await??;
    tracing::info!("Loaded {} environments", index.len());

    let refresh = spawn_refresh_task(
        Arc::clone(&catalog),
        config.artefacts.refresh_interval(),
    );

    let listener =
        TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;

    let result = server::serve(
        catalog,
        listener,
        &config.server.path_prefix,
        shutdown_signal(),
    )
    .await;

    if let Some(refresh) = refresh {
        refresh.abort();
    }

    result
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down"),
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await
        }
    }
}
