use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use outreach_adapters::FixtureChannelSource;
use outreach_pipeline::{
    run, run_backfill, text_services, Components, FieldExtractor, Pipeline, Settings,
};
use outreach_storage::{
    LeaseStore, MemoryLeaseStore, MemoryVacancyStore, PgLeaseStore, PgVacancyStore, VacancyStore,
};
use outreach_web::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "outreach")]
#[command(about = "Channel vacancy monitoring and recruiter outreach")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Backfill sweep, live subscription and the web surface.
    Run,
    /// One historical sweep over the configured channels, then exit.
    Backfill,
    /// Print the merged extraction for a vacancy text as JSON.
    Extract {
        #[arg(long)]
        file: PathBuf,
    },
    Migrate,
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_directive())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();
    settings.log_notices();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_service(settings).await?,
        Commands::Backfill => {
            if settings.channels.is_empty() {
                warn!("no channels configured, nothing to backfill");
            }
            let pipeline = build_pipeline(&settings, stores(&settings).await?)?;
            let summary =
                run_backfill(&pipeline, &settings.channels, &settings.backfill, Utc::now()).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Extract { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let (extract_service, _) = text_services(&settings)?;
            let extractor = FieldExtractor::new(&settings, extract_service);
            let result = extractor.extract(&text, None).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Migrate => {
            let url = settings
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for migrate")?;
            let pool = outreach_storage::connect(url).await?;
            outreach_storage::migrate(&pool).await?;
            info!("migrations applied");
        }
        Commands::Serve => {
            let (_, vacancies) = stores(&settings).await?;
            let state = AppState::new(vacancies, Arc::default());
            outreach_web::serve(state, settings.web_port).await?;
        }
    }

    Ok(())
}

type Stores = (Arc<dyn LeaseStore>, Arc<dyn VacancyStore>);

fn memory_stores() -> Stores {
    (
        Arc::new(MemoryLeaseStore::new()),
        Arc::new(MemoryVacancyStore::new()),
    )
}

/// Postgres when a database URL is configured, in-memory otherwise.
async fn stores(settings: &Settings) -> Result<Stores> {
    let Some(url) = settings.database_url.as_deref() else {
        warn!("DATABASE_URL not set, records and leases live in memory only");
        return Ok(memory_stores());
    };
    let pool = outreach_storage::connect(url).await?;
    outreach_storage::migrate(&pool).await?;
    Ok((
        Arc::new(PgLeaseStore::new(pool.clone())),
        Arc::new(PgVacancyStore::new(pool)),
    ))
}

fn build_pipeline(settings: &Settings, (leases, vacancies): Stores) -> Result<Pipeline> {
    let source = FixtureChannelSource::from_path(&settings.fixture_path)
        .with_context(|| format!("loading channel fixture {}", settings.fixture_path.display()))?;
    let (extract_service, reply_service) = text_services(settings)?;
    info!(
        ai_extract = extract_service.is_some(),
        ai_reply = reply_service.is_some(),
        replies_enabled = settings.replies_enabled,
        dry_run = settings.dry_run,
        "pipeline configured"
    );
    Ok(Pipeline::new(
        settings,
        Components {
            source: Arc::new(source),
            leases,
            vacancies,
            extract_service,
            reply_service,
        },
    ))
}

async fn run_service(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    let pipeline = Arc::new(build_pipeline(&settings, stores(&settings).await?)?);

    let state = AppState::new(pipeline.vacancies().clone(), pipeline.stats().clone());
    let port = settings.web_port;
    let web = tokio::spawn(async move {
        if let Err(err) = outreach_web::serve(state, port).await {
            error!(error = %err, "web surface stopped");
        }
    });

    let summary = run(pipeline, settings).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("producers finished, web surface stays up until interrupted");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        _ = web => {}
    }
    Ok(())
}
