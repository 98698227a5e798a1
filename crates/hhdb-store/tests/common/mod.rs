//! Throwaway Postgres for store integration tests.

#![allow(dead_code)]

use std::time::Duration;

use hhdb_core::{Employer, EmployerAggregate, EmployerId, Salary, Vacancy};
use hhdb_store::{DbConfig, Store};
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

pub const TEST_DATABASE: &str = "hhdb_test";

/// Starts Postgres and returns a config pointing at it. Keep the container
/// alive for the whole test.
pub async fn start_postgres() -> (DbConfig, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let config = DbConfig {
        host: host.to_string(),
        port,
        user: "postgres".into(),
        password: Some("postgres".into()),
        admin_database: "postgres".into(),
    };

    // The init script restarts the server once; retry until it settles.
    const MAX_RETRIES: u32 = 30;
    let store = Store::new(config.clone());
    for attempt in 1..=MAX_RETRIES {
        match store.connect("postgres").await {
            Ok(conn) => {
                conn.close().await.expect("close probe connection");
                break;
            }
            Err(e) if attempt == MAX_RETRIES => {
                panic!("Failed to connect after {MAX_RETRIES} retries: {e}")
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }

    (config, container)
}

pub async fn open(config: &DbConfig, database: &str) -> PgConnection {
    PgConnection::connect_with(&config.connect_options(database))
        .await
        .expect("connect to test database")
}

pub async fn count(conn: &mut PgConnection, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(conn)
        .await
        .expect("count rows")
}

pub fn employer(name: &str) -> Employer {
    Employer {
        name: Some(name.to_string()),
        area: Some("Metro".into()),
        page_url: Some(format!("https://hh.ru/employer/{name}")),
        website: None,
        open_vacancies: Some(2),
    }
}

pub fn vacancy(name: Option<&str>, salary: Option<(i32, &str)>) -> Vacancy {
    Vacancy {
        source_id: None,
        name: name.map(str::to_string),
        published_at: chrono::NaiveDate::from_ymd_opt(2024, 5, 2),
        employment: Some("Full time".into()),
        schedule: Some("Full day".into()),
        vacancy_type: Some("Open".into()),
        area: Some("Metro".into()),
        url: Some("https://hh.ru/vacancy/1".into()),
        salary: salary.map(|(amount, currency)| Salary {
            amount,
            currency: currency.to_string(),
        }),
    }
}

pub fn aggregate(id: u64, employer: Employer, vacancies: Vec<Vacancy>) -> EmployerAggregate {
    EmployerAggregate {
        employer_id: EmployerId(id),
        employer,
        vacancies,
    }
}
