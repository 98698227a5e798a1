//! Postgres persistence for HHDB: full-refresh schema provisioning and
//! transactional bulk load of employer aggregates.

use hhdb_core::{Employer, EmployerAggregate, Vacancy};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

pub const CRATE_NAME: &str = "hhdb-store";

pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// Longest identifier Postgres keeps without truncation.
const MAX_DATABASE_NAME_BYTES: usize = 63;

/// Table definitions, executed in order inside one transaction.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE employers (
        id_employer SERIAL PRIMARY KEY,
        employer_name VARCHAR(255) NOT NULL,
        area VARCHAR(100),
        employer_page TEXT,
        employer_website TEXT,
        open_vacancies INT
    )
    "#,
    r#"
    CREATE TABLE vacancies (
        id_vacancy SERIAL PRIMARY KEY,
        id_employer INT NOT NULL REFERENCES employers(id_employer),
        vacancy_name VARCHAR(255) NOT NULL,
        salary INT,
        currency VARCHAR(10),
        published_at DATE,
        employment VARCHAR(100),
        url_vacancy TEXT,
        schedule VARCHAR(100),
        type VARCHAR(100),
        area VARCHAR(100),
        CONSTRAINT salary_currency_paired CHECK ((salary IS NULL) = (currency IS NULL))
    )
    "#,
];

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("connecting to database {database}: {source}")]
    Connect {
        database: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("invalid database name {name:?}: {reason}")]
    InvalidDatabaseName { name: String, reason: &'static str },
}

impl PersistenceError {
    /// True when the database rejected a row (NOT NULL, FK, CHECK, UNIQUE).
    pub fn is_constraint_violation(&self) -> bool {
        let Self::Query { source, .. } = self else {
            return false;
        };
        source.as_database_error().is_some_and(|db| {
            matches!(
                db.kind(),
                ErrorKind::NotNullViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::CheckViolation
                    | ErrorKind::UniqueViolation
            )
        })
    }
}

trait QueryContext<T> {
    fn query_context(self, context: impl FnOnce() -> String) -> Result<T, PersistenceError>;
}

impl<T> QueryContext<T> for Result<T, sqlx::Error> {
    fn query_context(self, context: impl FnOnce() -> String) -> Result<T, PersistenceError> {
        self.map_err(|source| PersistenceError::Query {
            context: context(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Database used for DROP/CREATE of the target database.
    pub admin_database: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            admin_database: DEFAULT_ADMIN_DATABASE.to_string(),
        }
    }
}

impl DbConfig {
    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(database);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

pub fn validate_database_name(name: &str, admin_database: &str) -> Result<(), PersistenceError> {
    let reason = if name.trim().is_empty() {
        Some("must not be blank")
    } else if name.len() > MAX_DATABASE_NAME_BYTES {
        Some("longer than 63 bytes")
    } else if name.contains('\0') {
        Some("contains a NUL byte")
    } else if name == admin_database {
        Some("is the administrative database")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(PersistenceError::InvalidDatabaseName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub employers: usize,
    pub vacancies: usize,
    /// Generated `id_employer` values in insertion order.
    pub employer_keys: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct Store {
    config: DbConfig,
}

impl Store {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }

    pub async fn connect(&self, database: &str) -> Result<PgConnection, PersistenceError> {
        PgConnection::connect_with(&self.config.connect_options(database))
            .await
            .map_err(|source| PersistenceError::Connect {
                database: database.to_string(),
                source,
            })
    }

    /// Drop and recreate database `name`, then create the tables.
    ///
    /// Sessions connected to `name` are terminated first. Everything stored
    /// under that name before the call is gone afterwards.
    pub async fn provision_schema(&self, name: &str) -> Result<(), PersistenceError> {
        validate_database_name(name, &self.config.admin_database)?;

        async {
            let mut admin = self.connect(&self.config.admin_database).await?;
            let outcome = recreate_database(&mut admin, name).await;
            finish(admin, outcome).await?;
            info!("database recreated");

            let mut conn = self.connect(name).await?;
            let outcome = create_tables(&mut conn).await;
            finish(conn, outcome).await?;
            info!("tables created");
            Ok::<(), PersistenceError>(())
        }
        .instrument(info_span!("provision_schema", database = name))
        .await
    }

    /// Insert every aggregate in one transaction: each employer, then its
    /// vacancies keyed by the employer's generated id. Any failure rolls the
    /// whole call back.
    pub async fn load(
        &self,
        name: &str,
        aggregates: &[EmployerAggregate],
    ) -> Result<LoadSummary, PersistenceError> {
        async {
            let mut conn = self.connect(name).await?;
            let outcome = load_aggregates(&mut conn, aggregates).await;
            let summary = finish(conn, outcome).await?;
            info!(
                employers = summary.employers,
                vacancies = summary.vacancies,
                "load committed"
            );
            Ok::<LoadSummary, PersistenceError>(summary)
        }
        .instrument(info_span!("load", database = name))
        .await
    }
}

/// Close the connection whatever the outcome; the work's error wins.
async fn finish<T>(
    conn: PgConnection,
    outcome: Result<T, PersistenceError>,
) -> Result<T, PersistenceError> {
    let closed = conn.close().await;
    let value = outcome?;
    closed.query_context(|| "closing connection".to_string())?;
    Ok(value)
}

async fn recreate_database(conn: &mut PgConnection, name: &str) -> Result<(), PersistenceError> {
    sqlx::query(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = $1 AND pid <> pg_backend_pid()",
    )
    .bind(name)
    .execute(&mut *conn)
    .await
    .query_context(|| format!("terminating sessions on {name}"))?;

    // DDL takes no bind parameters for identifiers: the name is bound once
    // and quoted by the server.
    let quoted: String = sqlx::query_scalar("SELECT quote_ident($1)")
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .query_context(|| format!("quoting database name {name}"))?;

    sqlx::raw_sql(&format!("DROP DATABASE IF EXISTS {quoted}"))
        .execute(&mut *conn)
        .await
        .query_context(|| format!("dropping database {name}"))?;
    sqlx::raw_sql(&format!("CREATE DATABASE {quoted}"))
        .execute(&mut *conn)
        .await
        .query_context(|| format!("creating database {name}"))?;
    Ok(())
}

async fn create_tables(conn: &mut PgConnection) -> Result<(), PersistenceError> {
    let mut tx = conn
        .begin()
        .await
        .query_context(|| "opening schema transaction".to_string())?;
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .query_context(|| "creating tables".to_string())?;
    }
    tx.commit()
        .await
        .query_context(|| "committing schema".to_string())
}

async fn load_aggregates(
    conn: &mut PgConnection,
    aggregates: &[EmployerAggregate],
) -> Result<LoadSummary, PersistenceError> {
    let mut tx = conn
        .begin()
        .await
        .query_context(|| "opening load transaction".to_string())?;
    let mut summary = LoadSummary::default();

    for aggregate in aggregates {
        let employer_key = insert_employer(&mut tx, &aggregate.employer)
            .await
            .query_context(|| format!("inserting employer {}", aggregate.employer_id))?;

        for vacancy in &aggregate.vacancies {
            insert_vacancy(&mut tx, employer_key, vacancy)
                .await
                .query_context(|| {
                    format!(
                        "inserting vacancy {} of employer {}",
                        vacancy.source_id.as_deref().unwrap_or("<no id>"),
                        aggregate.employer_id
                    )
                })?;
        }

        debug!(
            employer_id = %aggregate.employer_id,
            employer_key,
            vacancies = aggregate.vacancies.len(),
            "employer staged"
        );
        summary.employers += 1;
        summary.vacancies += aggregate.vacancies.len();
        summary.employer_keys.push(employer_key);
    }

    tx.commit()
        .await
        .query_context(|| "committing load".to_string())?;
    Ok(summary)
}

async fn insert_employer(conn: &mut PgConnection, employer: &Employer) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO employers (employer_name, area, employer_page, employer_website, open_vacancies)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id_employer
        "#,
    )
    .bind(employer.name.as_deref())
    .bind(employer.area.as_deref())
    .bind(employer.page_url.as_deref())
    .bind(employer.website.as_deref())
    .bind(employer.open_vacancies)
    .fetch_one(conn)
    .await
}

async fn insert_vacancy(
    conn: &mut PgConnection,
    employer_key: i32,
    vacancy: &Vacancy,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO vacancies (id_employer, vacancy_name, salary, currency, published_at,
                               employment, url_vacancy, schedule, type, area)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id_vacancy
        "#,
    )
    .bind(employer_key)
    .bind(vacancy.name.as_deref())
    .bind(vacancy.salary_amount())
    .bind(vacancy.currency())
    .bind(vacancy.published_at)
    .bind(vacancy.employment.as_deref())
    .bind(vacancy.url.as_deref())
    .bind(vacancy.schedule.as_deref())
    .bind(vacancy.vacancy_type.as_deref())
    .bind(vacancy.area.as_deref())
    .fetch_one(conn)
    .await
}
