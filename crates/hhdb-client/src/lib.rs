//! HTTP transport for the recruitment API: raw payloads and fetch utilities.

use std::time::Duration;

use anyhow::Context;
use hhdb_core::EmployerId;
use reqwest::RequestBuilder;
use serde::de::{DeserializeOwned, Error as _};
use serde::Deserializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "hhdb-client";

pub const DEFAULT_API_BASE_URL: &str = "https://api.hh.ru";
pub const DEFAULT_USER_AGENT: &str = "hhdb/0.1";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("unexpected payload from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unusable {field} in {context}: {value:?}")]
    Malformed {
        context: String,
        field: &'static str,
        value: String,
    },
}

/// `{ "id": ..., "name": ... }` reference objects (area, schedule, ...).
/// Only the name is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NamedRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawEmployer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub area: Option<NamedRef>,
    #[serde(default)]
    pub alternate_url: Option<String>,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub open_vacancies: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawSalary {
    #[serde(default, deserialize_with = "rounded_amount")]
    pub from: Option<i32>,
    #[serde(default, deserialize_with = "rounded_amount")]
    pub to: Option<i32>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub gross: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawVacancy {
    #[serde(default, deserialize_with = "id_as_text")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub employment: Option<NamedRef>,
    #[serde(default)]
    pub schedule: Option<NamedRef>,
    #[serde(default, rename = "type")]
    pub vacancy_type: Option<NamedRef>,
    #[serde(default)]
    pub area: Option<NamedRef>,
    #[serde(default)]
    pub alternate_url: Option<String>,
    #[serde(default)]
    pub salary: Option<RawSalary>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(serde_json::Number),
}

/// Ids arrive as `"42"` or `42`.
fn id_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(|id| match id {
        IdRepr::Text(text) => text,
        IdRepr::Number(number) => number.to_string(),
    }))
}

/// Salary bounds are integers upstream but occasionally arrive as `1000.0`.
fn rounded_amount<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(amount) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let rounded = amount.round();
    if !rounded.is_finite() || rounded < f64::from(i32::MIN) || rounded > f64::from(i32::MAX) {
        return Err(D::Error::custom(format!("salary amount {amount} out of range")));
    }
    Ok(Some(rounded as i32))
}

/// One page of `/vacancies`. `items` is mandatory; the counters are informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawVacancyPage {
    pub items: Vec<RawVacancy>,
    #[serde(default)]
    pub found: Option<u64>,
    #[serde(default)]
    pub pages: Option<u32>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

/// Query string of a `/vacancies` page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VacancyQuery {
    pub text: String,
    pub employer_id: EmployerId,
    pub page: u32,
    pub per_page: u32,
}

impl VacancyQuery {
    pub fn for_employer(employer_id: EmployerId, page: u32, per_page: u32) -> Self {
        Self {
            text: String::new(),
            employer_id,
            page,
            per_page,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HhClient {
    client: reqwest::Client,
    base_url: String,
}

impl HhClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /employers/{id}`.
    pub async fn employer(&self, id: EmployerId) -> Result<RawEmployer, UpstreamError> {
        let url = format!("{}/employers/{id}", self.base_url);
        let request = self.client.get(&url);
        self.send_json(request, url).await
    }

    /// `GET /vacancies?text=&employer_id=&page=&per_page=`.
    pub async fn vacancy_page(&self, query: &VacancyQuery) -> Result<RawVacancyPage, UpstreamError> {
        let url = format!("{}/vacancies", self.base_url);
        let request = self.client.get(&url).query(query);
        self.send_json(request, url).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: String,
    ) -> Result<T, UpstreamError> {
        let span = info_span!("upstream_get", url = %url);
        async move {
            let resp = request
                .send()
                .await
                .map_err(|source| UpstreamError::Request {
                    url: url.clone(),
                    source,
                })?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(UpstreamError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await.map_err(|source| UpstreamError::Request {
                url: final_url.clone(),
                source,
            })?;
            debug!(bytes = body.len(), "upstream response received");
            serde_json::from_slice(&body).map_err(|source| UpstreamError::Decode {
                url: final_url,
                source,
            })
        }
        .instrument(span)
        .await
    }
}
