use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use hhdb_report::ReportRepository;
use hhdb_store::Store;
use hhdb_sync::{EmployerId, SyncConfig, SyncEvent, SyncPipeline, SyncReporter};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "hhdb")]
#[command(about = "Load HeadHunter employers and vacancies into PostgreSQL")]
struct Cli {
    /// Database to refresh or query. Overrides HHDB_DATABASE_NAME.
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every employer, recreate the database and load the results.
    Sync(SyncArgs),
    /// Drop and recreate the database with empty tables.
    Provision,
    /// Query a loaded database.
    Report {
        #[command(subcommand)]
        query: ReportQuery,
    },
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Employer to fetch; repeat for several. Replaces HHDB_EMPLOYER_IDS.
    #[arg(long = "employer-id", value_name = "ID")]
    employer_ids: Vec<u64>,

    /// Vacancy pages requested per employer.
    #[arg(long)]
    page_limit: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum ReportQuery {
    /// Vacancy count per employer.
    Companies,
    /// Every vacancy with its employer, salary and link.
    Vacancies,
    /// Average posted salary.
    AvgSalary,
    /// Vacancies paying more than the average.
    AboveAverage,
    /// Vacancies whose name contains a word.
    Search { keyword: String },
}

struct ConsoleReporter;

impl SyncReporter for ConsoleReporter {
    fn report(&self, event: SyncEvent<'_>) {
        match event {
            SyncEvent::EmployerFetched { progress, .. } => {
                println!("Progress: {}%", progress.percent());
            }
            SyncEvent::FetchFinished { .. } => {}
            SyncEvent::SchemaProvisioned { database } => {
                println!("Database {database} recreated");
            }
            SyncEvent::DataLoaded {
                database,
                employers,
                vacancies,
            } => {
                println!("Loaded {employers} employers and {vacancies} vacancies into {database}");
            }
        }
    }
}

fn apply_overrides(
    config: &mut SyncConfig,
    database: Option<String>,
    args: Option<&SyncArgs>,
) -> Result<()> {
    if let Some(database) = database {
        config.database_name = database;
    }
    if let Some(args) = args {
        if !args.employer_ids.is_empty() {
            config.employer_ids = args.employer_ids.iter().copied().map(EmployerId).collect();
        }
        if let Some(page_limit) = args.page_limit {
            config.fetch.page_limit = page_limit;
        }
    }
    config.validate()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber")?;

    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Sync(SyncArgs::default()));

    let mut config = SyncConfig::from_env()?;
    let sync_args = match &command {
        Commands::Sync(args) => Some(args),
        _ => None,
    };
    apply_overrides(&mut config, cli.database, sync_args)?;

    match command {
        Commands::Sync(_) => {
            let pipeline = SyncPipeline::new(config)?.with_reporter(Arc::new(ConsoleReporter));
            let summary = pipeline.run_once().await?;
            println!(
                "sync complete: run_id={} database={} employers={} vacancies={} requests={} elapsed={}ms",
                summary.run_id,
                summary.database_name,
                summary.employers,
                summary.vacancies,
                summary.upstream_requests,
                (summary.finished_at - summary.started_at).num_milliseconds()
            );
        }
        Commands::Provision => {
            provision(&config).await?;
            println!("Database {} recreated", config.database_name);
        }
        Commands::Report { query } => {
            let repo = ReportRepository::connect(&config.db, &config.database_name).await?;
            let result = run_report(&repo, query).await;
            repo.close().await;
            result?;
        }
    }

    Ok(())
}

async fn provision(config: &SyncConfig) -> Result<()> {
    Store::new(config.db.clone())
        .provision_schema(&config.database_name)
        .await
        .with_context(|| format!("provisioning database {}", config.database_name))
}

async fn run_report(repo: &ReportRepository, query: ReportQuery) -> Result<()> {
    match query {
        ReportQuery::Companies => {
            for row in repo.companies_and_vacancies_count().await? {
                println!("{}: {}", row.employer_name, row.vacancies);
            }
        }
        ReportQuery::Vacancies => {
            for row in repo.all_vacancies().await? {
                let salary = match (row.salary, row.currency.as_deref()) {
                    (Some(amount), Some(currency)) => format!("{amount} {currency}"),
                    _ => "salary not specified".to_string(),
                };
                println!(
                    "{} | {} | {} | {}",
                    row.employer_name,
                    row.vacancy_name,
                    salary,
                    row.url.as_deref().unwrap_or("-")
                );
            }
        }
        ReportQuery::AvgSalary => match repo.avg_salary().await? {
            Some(avg) => println!("Average salary: {avg}"),
            None => println!("No vacancies with a salary"),
        },
        ReportQuery::AboveAverage => {
            for row in repo.vacancies_with_higher_salary().await? {
                println!("{}: {}", row.vacancy_name, row.salary);
            }
        }
        ReportQuery::Search { keyword } => {
            let rows = repo.vacancies_with_keyword(&keyword).await?;
            if rows.is_empty() {
                println!("No vacancies matching {keyword:?}");
            }
            for row in rows {
                println!(
                    "{} | {} | {}",
                    row.vacancy_name,
                    row.area.as_deref().unwrap_or("-"),
                    row.url.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}
