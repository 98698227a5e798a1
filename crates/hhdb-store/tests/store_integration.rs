//! Store integration tests against a real Postgres.
//!
//! They need Docker and are ignored by default:
//!
//! ```bash
//! cargo test -p hhdb-store -- --ignored
//! ```

mod common;

use common::{aggregate, count, employer, open, start_postgres, vacancy, TEST_DATABASE};
use hhdb_store::Store;
use sqlx::Row;

#[tokio::test]
#[ignore = "requires Docker"]
async fn provision_twice_leaves_the_same_empty_schema() {
    let (config, _container) = start_postgres().await;
    let store = Store::new(config.clone());

    store.provision_schema(TEST_DATABASE).await.expect("first provision");
    store
        .load(
            TEST_DATABASE,
            &[aggregate(1, employer("Acme"), vec![vacancy(Some("Engineer"), None)])],
        )
        .await
        .expect("load");

    store.provision_schema(TEST_DATABASE).await.expect("second provision");

    let mut conn = open(&config, TEST_DATABASE).await;
    assert_eq!(count(&mut conn, "employers").await, 0);
    assert_eq!(count(&mut conn, "vacancies").await, 0);

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables \
         WHERE table_schema = 'public' ORDER BY table_name",
    )
    .fetch_all(&mut conn)
    .await
    .unwrap();
    assert_eq!(tables, vec!["employers".to_string(), "vacancies".to_string()]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn provision_terminates_sessions_on_the_target_database() {
    let (config, _container) = start_postgres().await;
    let store = Store::new(config.clone());
    store.provision_schema(TEST_DATABASE).await.unwrap();

    let _lingering = open(&config, TEST_DATABASE).await;
    store
        .provision_schema(TEST_DATABASE)
        .await
        .expect("provision despite an open session");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn provision_handles_names_that_need_quoting() {
    let (config, _container) = start_postgres().await;
    let store = Store::new(config.clone());
    let name = "Head \"Hunter\"; DROP";

    store.provision_schema(name).await.expect("provision quoted name");
    store.provision_schema(name).await.expect("provision quoted name again");

    let mut conn = open(&config, name).await;
    assert_eq!(count(&mut conn, "employers").await, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn one_employer_two_vacancies_end_to_end() {
    let (config, _container) = start_postgres().await;
    let store = Store::new(config.clone());
    store.provision_schema(TEST_DATABASE).await.unwrap();

    let summary = store
        .load(
            TEST_DATABASE,
            &[aggregate(
                1740,
                employer("Acme"),
                vec![
                    vacancy(Some("Engineer"), Some((1000, "USD"))),
                    vacancy(Some("Analyst"), None),
                ],
            )],
        )
        .await
        .expect("load");
    assert_eq!(summary.employers, 1);
    assert_eq!(summary.vacancies, 2);

    let mut conn = open(&config, TEST_DATABASE).await;
    let employer_row = sqlx::query(
        "SELECT id_employer, employer_name, area, open_vacancies FROM employers",
    )
    .fetch_one(&mut conn)
    .await
    .unwrap();
    let employer_key: i32 = employer_row.get("id_employer");
    assert_eq!(summary.employer_keys, vec![employer_key]);
    assert_eq!(employer_row.get::<String, _>("employer_name"), "Acme");
    assert_eq!(employer_row.get::<Option<String>, _>("area").as_deref(), Some("Metro"));
    assert_eq!(employer_row.get::<Option<i32>, _>("open_vacancies"), Some(2));

    let rows = sqlx::query(
        "SELECT id_employer, vacancy_name, salary, currency, published_at \
         FROM vacancies ORDER BY id_vacancy",
    )
    .fetch_all(&mut conn)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].get::<i32, _>("id_employer"), employer_key);
    assert_eq!(rows[0].get::<String, _>("vacancy_name"), "Engineer");
    assert_eq!(rows[0].get::<Option<i32>, _>("salary"), Some(1000));
    assert_eq!(rows[0].get::<Option<String>, _>("currency").as_deref(), Some("USD"));
    assert_eq!(
        rows[0].get::<Option<chrono::NaiveDate>, _>("published_at"),
        chrono::NaiveDate::from_ymd_opt(2024, 5, 2)
    );

    assert_eq!(rows[1].get::<i32, _>("id_employer"), employer_key);
    assert_eq!(rows[1].get::<Option<i32>, _>("salary"), None);
    assert_eq!(rows[1].get::<Option<String>, _>("currency"), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn every_vacancy_references_an_employer_from_the_same_load() {
    let (config, _container) = start_postgres().await;
    let store = Store::new(config.clone());
    store.provision_schema(TEST_DATABASE).await.unwrap();

    let summary = store
        .load(
            TEST_DATABASE,
            &[
                aggregate(1, employer("One"), vec![vacancy(Some("a"), None)]),
                aggregate(2, employer("Two"), vec![]),
                aggregate(
                    3,
                    employer("Three"),
                    vec![vacancy(Some("b"), Some((5, "EUR"))), vacancy(Some("c"), None)],
                ),
            ],
        )
        .await
        .unwrap();
    assert_eq!(summary.employer_keys.len(), 3);

    let mut conn = open(&config, TEST_DATABASE).await;
    let keys: Vec<i32> = sqlx::query_scalar("SELECT id_employer FROM vacancies ORDER BY id_vacancy")
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(
        keys,
        vec![
            summary.employer_keys[0],
            summary.employer_keys[2],
            summary.employer_keys[2]
        ]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn a_rejected_vacancy_rolls_back_the_whole_load() {
    let (config, _container) = start_postgres().await;
    let store = Store::new(config.clone());
    store.provision_schema(TEST_DATABASE).await.unwrap();

    let err = store
        .load(
            TEST_DATABASE,
            &[
                aggregate(1, employer("Committed?"), vec![vacancy(Some("fine"), None)]),
                aggregate(
                    2,
                    employer("Broken"),
                    vec![
                        vacancy(Some("before"), None),
                        vacancy(None, None),
                        vacancy(Some("after"), None),
                    ],
                ),
            ],
        )
        .await
        .unwrap_err();
    assert!(err.is_constraint_violation(), "{err}");
    assert!(err.to_string().contains("employer 2"), "{err}");

    let mut conn = open(&config, TEST_DATABASE).await;
    assert_eq!(count(&mut conn, "employers").await, 0);
    assert_eq!(count(&mut conn, "vacancies").await, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn employer_without_name_is_rejected() {
    let (config, _container) = start_postgres().await;
    let store = Store::new(config.clone());
    store.provision_schema(TEST_DATABASE).await.unwrap();

    let mut nameless = employer("x");
    nameless.name = None;
    let err = store
        .load(TEST_DATABASE, &[aggregate(9, nameless, vec![])])
        .await
        .unwrap_err();
    assert!(err.is_constraint_violation(), "{err}");
}
