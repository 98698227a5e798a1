//! Read-only reporting queries over a loaded HHDB database.

use anyhow::Context;
use chrono::NaiveDate;
use hhdb_store::DbConfig;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

pub const CRATE_NAME: &str = "hhdb-report";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployerVacancyCount {
    pub employer_name: String,
    pub vacancies: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VacancyListing {
    pub vacancy_name: String,
    pub employer_name: String,
    pub salary: Option<i32>,
    pub currency: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalaryListing {
    pub vacancy_name: String,
    pub salary: i32,
}

/// A full `vacancies` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VacancyRow {
    pub id_vacancy: i32,
    pub id_employer: i32,
    pub vacancy_name: String,
    pub salary: Option<i32>,
    pub currency: Option<String>,
    pub published_at: Option<NaiveDate>,
    pub employment: Option<String>,
    pub url: Option<String>,
    pub schedule: Option<String>,
    pub vacancy_type: Option<String>,
    pub area: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: PgPool,
}

impl ReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DbConfig, database: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(config.connect_options(database))
            .await
            .with_context(|| format!("connecting to database {database}"))?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Vacancy count per employer, employers without vacancies included.
    pub async fn companies_and_vacancies_count(&self) -> anyhow::Result<Vec<EmployerVacancyCount>> {
        let rows = sqlx::query(
            r#"
            SELECT e.employer_name, COUNT(v.id_vacancy) AS vacancies
              FROM employers e
              LEFT JOIN vacancies v USING (id_employer)
             GROUP BY e.id_employer, e.employer_name
             ORDER BY vacancies DESC, e.employer_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("counting vacancies per employer")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(EmployerVacancyCount {
                employer_name: row.try_get("employer_name")?,
                vacancies: row.try_get("vacancies")?,
            });
        }
        Ok(out)
    }

    pub async fn all_vacancies(&self) -> anyhow::Result<Vec<VacancyListing>> {
        let rows = sqlx::query(
            r#"
            SELECT v.vacancy_name, e.employer_name, v.salary, v.currency, v.url_vacancy
              FROM vacancies v
              JOIN employers e USING (id_employer)
             ORDER BY v.id_vacancy
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing vacancies")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(VacancyListing {
                vacancy_name: row.try_get("vacancy_name")?,
                employer_name: row.try_get("employer_name")?,
                salary: row.try_get("salary")?,
                currency: row.try_get("currency")?,
                url: row.try_get("url_vacancy")?,
            });
        }
        Ok(out)
    }

    /// Rounded mean of the posted lower bounds; `None` when no vacancy has one.
    pub async fn avg_salary(&self) -> anyhow::Result<Option<i32>> {
        sqlx::query_scalar::<_, Option<i32>>("SELECT AVG(salary)::INT FROM vacancies")
            .fetch_one(&self.pool)
            .await
            .context("averaging salaries")
    }

    pub async fn vacancies_with_higher_salary(&self) -> anyhow::Result<Vec<SalaryListing>> {
        let rows = sqlx::query(
            r#"
            SELECT vacancy_name, salary
              FROM vacancies
             WHERE salary > (SELECT AVG(salary) FROM vacancies)
             ORDER BY salary DESC, id_vacancy
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing above-average salaries")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SalaryListing {
                vacancy_name: row.try_get("vacancy_name")?,
                salary: row.try_get("salary")?,
            });
        }
        Ok(out)
    }

    /// Vacancies whose name contains `keyword`, ignoring case. `%` and `_`
    /// in the keyword match themselves.
    pub async fn vacancies_with_keyword(&self, keyword: &str) -> anyhow::Result<Vec<VacancyRow>> {
        let pattern = contains_pattern(keyword);
        debug!(%pattern, "keyword search");
        let rows = sqlx::query(
            r#"
            SELECT id_vacancy, id_employer, vacancy_name, salary, currency, published_at,
                   employment, url_vacancy, schedule, type, area
              FROM vacancies
             WHERE vacancy_name ILIKE $1 ESCAPE '\'
             ORDER BY id_vacancy
            "#,
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("searching vacancies for {keyword:?}"))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(VacancyRow {
                id_vacancy: row.try_get("id_vacancy")?,
                id_employer: row.try_get("id_employer")?,
                vacancy_name: row.try_get("vacancy_name")?,
                salary: row.try_get("salary")?,
                currency: row.try_get("currency")?,
                published_at: row.try_get("published_at")?,
                employment: row.try_get("employment")?,
                url: row.try_get("url_vacancy")?,
                schedule: row.try_get("schedule")?,
                vacancy_type: row.try_get("type")?,
                area: row.try_get("area")?,
            });
        }
        Ok(out)
    }
}

/// `LIKE` pattern matching `keyword` anywhere, with wildcards escaped.
pub fn contains_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
