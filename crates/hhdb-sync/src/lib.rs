//! Sync pipeline orchestration: fetch every configured employer, reset the
//! database, load the aggregates.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hhdb_client::{HhClient, HttpClientConfig, DEFAULT_API_BASE_URL, DEFAULT_USER_AGENT};
use hhdb_core::{count_vacancies, EmployerAggregate};
use hhdb_fetch::{
    FetchConfig, FetchProgress, Fetcher, ProgressHook, RecruitmentApi, DEFAULT_PAGE_LIMIT,
    DEFAULT_PER_PAGE, MAX_PER_PAGE,
};
use hhdb_store::{validate_database_name, DbConfig, LoadSummary, Store, DEFAULT_ADMIN_DATABASE};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub use hhdb_core::EmployerId;

pub const CRATE_NAME: &str = "hhdb-sync";

pub const DEFAULT_DATABASE_NAME: &str = "headhunter";

/// Employers processed when `HHDB_EMPLOYER_IDS` is not set.
pub const DEFAULT_EMPLOYER_IDS: [u64; 10] = [
    1740, 78638, 3529, 4181, 740, 80, 39305, 907345, 49357, 1942330,
];

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db: DbConfig,
    pub database_name: String,
    pub employer_ids: Vec<EmployerId>,
    pub http: HttpClientConfig,
    pub fetch: FetchConfig,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from a variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db = DbConfig {
            host: var("HHDB_DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_or("HHDB_DB_PORT", var("HHDB_DB_PORT"), 5432)?,
            user: var("HHDB_DB_USER").unwrap_or_else(|| "postgres".to_string()),
            password: var("HHDB_DB_PASSWORD"),
            admin_database: var("HHDB_ADMIN_DATABASE")
                .unwrap_or_else(|| DEFAULT_ADMIN_DATABASE.to_string()),
        };

        let employer_ids = match var("HHDB_EMPLOYER_IDS") {
            Some(raw) => parse_employer_ids(&raw)?,
            None => DEFAULT_EMPLOYER_IDS.iter().copied().map(EmployerId).collect(),
        };

        let http = HttpClientConfig {
            base_url: var("HHDB_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            timeout: Duration::from_secs(parse_or(
                "HHDB_HTTP_TIMEOUT_SECS",
                var("HHDB_HTTP_TIMEOUT_SECS"),
                20u64,
            )?),
            user_agent: Some(var("HHDB_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())),
        };

        let fetch = FetchConfig {
            page_limit: parse_or("HHDB_PAGE_LIMIT", var("HHDB_PAGE_LIMIT"), DEFAULT_PAGE_LIMIT)?,
            per_page: parse_or("HHDB_PER_PAGE", var("HHDB_PER_PAGE"), DEFAULT_PER_PAGE)?,
        };

        let config = Self {
            db,
            database_name: var("HHDB_DATABASE_NAME")
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            employer_ids,
            http,
            fetch,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.employer_ids.is_empty() {
            bail!("no employer ids configured");
        }
        if self.fetch.page_limit == 0 {
            bail!("page limit must be at least 1");
        }
        if !(1..=MAX_PER_PAGE).contains(&self.fetch.per_page) {
            bail!(
                "per-page size {} outside 1..={MAX_PER_PAGE}",
                self.fetch.per_page
            );
        }
        validate_database_name(&self.database_name, &self.db.admin_database)?;
        Ok(())
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("parsing {key}={raw:?}")),
        None => Ok(default),
    }
}

/// Parse a comma-separated id list such as `1740, 78638,3529`.
pub fn parse_employer_ids(raw: &str) -> Result<Vec<EmployerId>> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<EmployerId>()
                .with_context(|| format!("invalid employer id {part:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if ids.is_empty() {
        bail!("employer id list {raw:?} is empty");
    }
    Ok(ids)
}

/// Pipeline milestones, for console output or logs.
#[derive(Debug, Clone)]
pub enum SyncEvent<'a> {
    EmployerFetched {
        progress: FetchProgress,
        employer_id: EmployerId,
        name: Option<&'a str>,
        vacancies: usize,
    },
    FetchFinished {
        employers: usize,
        vacancies: usize,
    },
    SchemaProvisioned {
        database: &'a str,
    },
    DataLoaded {
        database: &'a str,
        employers: usize,
        vacancies: usize,
    },
}

pub trait SyncReporter: Send + Sync {
    fn report(&self, event: SyncEvent<'_>) {
        let _ = event;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl SyncReporter for SilentReporter {}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn report(&self, event: SyncEvent<'_>) {
        match event {
            SyncEvent::EmployerFetched {
                progress,
                employer_id,
                vacancies,
                ..
            } => {
                info!(%employer_id, vacancies, percent = progress.percent(), "fetch progress");
            }
            SyncEvent::FetchFinished {
                employers,
                vacancies,
            } => info!(employers, vacancies, "fetch finished"),
            SyncEvent::SchemaProvisioned { database } => info!(database, "schema provisioned"),
            SyncEvent::DataLoaded {
                database,
                employers,
                vacancies,
            } => info!(database, employers, vacancies, "data loaded"),
        }
    }
}

struct ReporterProgress(Arc<dyn SyncReporter>);

impl ProgressHook for ReporterProgress {
    fn on_employer(&self, progress: FetchProgress, aggregate: &EmployerAggregate) {
        self.0.report(SyncEvent::EmployerFetched {
            progress,
            employer_id: aggregate.employer_id,
            name: aggregate.employer.name.as_deref(),
            vacancies: aggregate.vacancies.len(),
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub database_name: String,
    pub employers: usize,
    pub vacancies: usize,
    pub upstream_requests: usize,
}

pub struct SyncPipeline<A = HhClient> {
    config: SyncConfig,
    fetcher: Fetcher<A>,
    store: Store,
    reporter: Arc<dyn SyncReporter>,
}

impl SyncPipeline<HhClient> {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = HhClient::new(config.http.clone())?;
        Ok(Self::with_api(config, client))
    }
}

impl<A: RecruitmentApi> SyncPipeline<A> {
    pub fn with_api(config: SyncConfig, api: A) -> Self {
        let reporter: Arc<dyn SyncReporter> = Arc::new(TracingReporter);
        let fetcher = Fetcher::new(api, config.fetch)
            .with_progress(Box::new(ReporterProgress(reporter.clone())));
        let store = Store::new(config.db.clone());
        Self {
            config,
            fetcher,
            store,
            reporter,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn SyncReporter>) -> Self {
        self.fetcher = self
            .fetcher
            .with_progress(Box::new(ReporterProgress(reporter.clone())));
        self.reporter = reporter;
        self
    }

    pub async fn fetch(&self) -> Result<Vec<EmployerAggregate>> {
        let aggregates = self
            .fetcher
            .fetch(&self.config.employer_ids)
            .await
            .context("fetching employers and vacancies")?;
        self.reporter.report(SyncEvent::FetchFinished {
            employers: aggregates.len(),
            vacancies: count_vacancies(&aggregates),
        });
        Ok(aggregates)
    }

    pub async fn provision(&self) -> Result<()> {
        let database = self.config.database_name.as_str();
        self.store
            .provision_schema(database)
            .await
            .with_context(|| format!("provisioning database {database}"))?;
        self.reporter.report(SyncEvent::SchemaProvisioned { database });
        Ok(())
    }

    pub async fn load(&self, aggregates: &[EmployerAggregate]) -> Result<LoadSummary> {
        let database = self.config.database_name.as_str();
        let summary = self
            .store
            .load(database, aggregates)
            .await
            .with_context(|| format!("loading data into {database}"))?;
        self.reporter.report(SyncEvent::DataLoaded {
            database,
            employers: summary.employers,
            vacancies: summary.vacancies,
        });
        Ok(summary)
    }

    /// Fetch, then reset the database, then load. Fetching first keeps the
    /// previous data in place when the upstream API fails.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, database = %self.config.database_name);

        async {
            let aggregates = self.fetch().await?;
            self.provision().await?;
            let loaded = self.load(&aggregates).await?;

            Ok::<_, anyhow::Error>(SyncRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                database_name: self.config.database_name.clone(),
                employers: loaded.employers,
                vacancies: loaded.vacancies,
                upstream_requests: aggregates.len()
                    * self.config.fetch.requests_per_employer(),
            })
        }
        .instrument(span)
        .await
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env()?;
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_once().await
}
