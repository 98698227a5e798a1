use std::time::Duration;

use hhdb_client::{HhClient, HttpClientConfig};
use hhdb_core::EmployerId;
use hhdb_fetch::{FetchConfig, Fetcher};
use mockito::{Matcher, Server};

fn page_query(employer_id: &str, page: &str) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("text".into(), "".into()),
        Matcher::UrlEncoded("employer_id".into(), employer_id.into()),
        Matcher::UrlEncoded("page".into(), page.into()),
        Matcher::UrlEncoded("per_page".into(), "100".into()),
    ])
}

#[tokio::test]
async fn fetches_profile_then_every_page_over_http() {
    let mut server = Server::new_async().await;
    let employer = server
        .mock("GET", "/employers/1740")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"1740","name":"Acme","area":{"id":"1","name":"Metro"},"open_vacancies":2}"#)
        .expect(1)
        .create_async()
        .await;
    let page0 = server
        .mock("GET", "/vacancies")
        .match_query(page_query("1740", "0"))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"items":[{"id":"1","name":"Engineer","published_at":"2024-05-02T09:00:00+0300",
                "salary":{"from":1000,"to":null,"currency":"USD","gross":false},
                "alternate_url":"https://hh.ru/vacancy/1"}],"pages":2}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let page1 = server
        .mock("GET", "/vacancies")
        .match_query(page_query("1740", "1"))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items":[{"id":"2","name":"Analyst","salary":null}],"pages":2}"#)
        .expect(1)
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/vacancies")
        .match_query(page_query("1740", "2"))
        .with_status(200)
        .with_body(r#"{"items":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let client = HhClient::new(HttpClientConfig {
        base_url: server.url(),
        timeout: Duration::from_secs(5),
        user_agent: Some("hhdb-test".into()),
    })
    .expect("client");
    let fetcher = Fetcher::new(
        client,
        FetchConfig {
            page_limit: 3,
            per_page: 100,
        },
    );

    let aggregates = fetcher.fetch(&[EmployerId(1740)]).await.expect("fetch");

    employer.assert_async().await;
    page0.assert_async().await;
    page1.assert_async().await;
    page2.assert_async().await;

    assert_eq!(aggregates.len(), 1);
    let vacancies = &aggregates[0].vacancies;
    assert_eq!(vacancies.len(), 2);
    assert_eq!(vacancies[0].salary_amount(), Some(1000));
    assert_eq!(vacancies[0].currency(), Some("USD"));
    assert_eq!(
        vacancies[0].published_at.map(|d| d.to_string()).as_deref(),
        Some("2024-05-02")
    );
    assert_eq!(vacancies[0].url.as_deref(), Some("https://hh.ru/vacancy/1"));
    assert_eq!((vacancies[1].salary_amount(), vacancies[1].currency()), (None, None));
}

#[tokio::test]
async fn unusable_profile_stops_before_any_page_request() {
    let mut server = Server::new_async().await;
    let _employer = server
        .mock("GET", "/employers/5")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;
    let pages = server
        .mock("GET", "/vacancies")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let client = HhClient::new(HttpClientConfig {
        base_url: server.url(),
        ..Default::default()
    })
    .expect("client");
    let fetcher = Fetcher::new(client, FetchConfig::default());

    let err = fetcher.fetch(&[EmployerId(5)]).await.unwrap_err();
    assert!(err.to_string().contains("unexpected payload"), "{err}");
    pages.assert_async().await;
}
