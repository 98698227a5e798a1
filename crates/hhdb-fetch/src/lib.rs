//! Employer/vacancy fetcher and shaping rules for upstream payloads.

use async_trait::async_trait;
use chrono::NaiveDate;
use hhdb_client::{
    HhClient, NamedRef, RawEmployer, RawSalary, RawVacancy, RawVacancyPage, UpstreamError,
    VacancyQuery,
};
use hhdb_core::{Employer, EmployerAggregate, EmployerId, Salary, Vacancy};
use tracing::{debug, info, info_span, Instrument};

pub const CRATE_NAME: &str = "hhdb-fetch";

/// Pages requested per employer when nothing else is configured.
pub const DEFAULT_PAGE_LIMIT: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 100;
/// Upper bound the upstream API accepts for `per_page`.
pub const MAX_PER_PAGE: u32 = 100;

/// The two upstream calls the fetcher depends on.
#[async_trait]
pub trait RecruitmentApi: Send + Sync {
    async fn employer(&self, id: EmployerId) -> Result<RawEmployer, UpstreamError>;

    async fn vacancy_page(&self, query: &VacancyQuery) -> Result<RawVacancyPage, UpstreamError>;
}

#[async_trait]
impl RecruitmentApi for HhClient {
    async fn employer(&self, id: EmployerId) -> Result<RawEmployer, UpstreamError> {
        HhClient::employer(self, id).await
    }

    async fn vacancy_page(&self, query: &VacancyQuery) -> Result<RawVacancyPage, UpstreamError> {
        HhClient::vacancy_page(self, query).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    /// Number of vacancy pages requested per employer, starting at page 0.
    /// Fixed: the upstream `pages` counter is not consulted.
    pub page_limit: u32,
    pub per_page: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl FetchConfig {
    pub fn requests_per_employer(&self) -> usize {
        1 + self.page_limit as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub done: usize,
    pub total: usize,
}

impl FetchProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.done.min(self.total) * 100) / self.total) as u8
    }
}

pub trait ProgressHook: Send + Sync {
    fn on_employer(&self, progress: FetchProgress, aggregate: &EmployerAggregate);
}

#[derive(Default)]
pub struct NoopProgressHook;

impl ProgressHook for NoopProgressHook {
    fn on_employer(&self, _progress: FetchProgress, _aggregate: &EmployerAggregate) {}
}

pub struct Fetcher<A> {
    api: A,
    config: FetchConfig,
    progress: Box<dyn ProgressHook>,
}

impl<A: RecruitmentApi> Fetcher<A> {
    pub fn new(api: A, config: FetchConfig) -> Self {
        Self {
            api,
            config,
            progress: Box::<NoopProgressHook>::default(),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressHook>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> FetchConfig {
        self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Fetch and shape every employer, strictly one request at a time.
    /// The output keeps the order of `employer_ids`; the first failure aborts.
    pub async fn fetch(
        &self,
        employer_ids: &[EmployerId],
    ) -> Result<Vec<EmployerAggregate>, UpstreamError> {
        let total = employer_ids.len();
        let mut aggregates = Vec::with_capacity(total);

        for (idx, &employer_id) in employer_ids.iter().enumerate() {
            let aggregate = self.fetch_employer(employer_id).await?;
            self.progress.on_employer(
                FetchProgress {
                    done: idx + 1,
                    total,
                },
                &aggregate,
            );
            aggregates.push(aggregate);
        }

        Ok(aggregates)
    }

    pub async fn fetch_employer(
        &self,
        employer_id: EmployerId,
    ) -> Result<EmployerAggregate, UpstreamError> {
        let span = info_span!("fetch_employer", %employer_id);
        async move {
            let raw = self.api.employer(employer_id).await?;
            let mut aggregate = EmployerAggregate::new(employer_id, shape_employer(raw));

            for page in 0..self.config.page_limit {
                let query = VacancyQuery::for_employer(employer_id, page, self.config.per_page);
                let raw_page = self.api.vacancy_page(&query).await?;
                debug!(page, items = raw_page.items.len(), "vacancy page received");
                for item in raw_page.items {
                    aggregate.vacancies.push(shape_vacancy(item)?);
                }
            }

            info!(
                employer = aggregate.employer.name.as_deref().unwrap_or("<unnamed>"),
                vacancies = aggregate.vacancies.len(),
                "employer fetched"
            );
            Ok::<_, UpstreamError>(aggregate)
        }
        .instrument(span)
        .await
    }
}

pub fn shape_employer(raw: RawEmployer) -> Employer {
    Employer {
        name: required_text(raw.name),
        area: ref_name(raw.area),
        page_url: text_or_none(raw.alternate_url),
        website: text_or_none(raw.site_url),
        open_vacancies: raw.open_vacancies,
    }
}

pub fn shape_vacancy(raw: RawVacancy) -> Result<Vacancy, UpstreamError> {
    let published_at = match text_or_none(raw.published_at) {
        Some(value) => Some(parse_published_date(&value).ok_or_else(|| {
            UpstreamError::Malformed {
                context: format!("vacancy {}", raw.id.as_deref().unwrap_or("<no id>")),
                field: "published_at",
                value,
            }
        })?),
        None => None,
    };

    Ok(Vacancy {
        source_id: raw.id,
        name: required_text(raw.name),
        published_at,
        employment: ref_name(raw.employment),
        schedule: ref_name(raw.schedule),
        vacancy_type: ref_name(raw.vacancy_type),
        area: ref_name(raw.area),
        url: text_or_none(raw.alternate_url),
        salary: normalize_salary(raw.salary),
    })
}

/// Keep only the lower bound of the range; without it there is no salary,
/// even when `to` or `currency` are present.
pub fn normalize_salary(raw: Option<RawSalary>) -> Option<Salary> {
    let raw = raw?;
    Salary::from_lower_bound(raw.from, text_or_none(raw.currency))
}

/// Calendar date of an upstream timestamp such as `2024-03-01T10:15:00+0300`.
pub fn parse_published_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.trim().get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn ref_name(value: Option<NamedRef>) -> Option<String> {
    value.and_then(|r| text_or_none(r.name))
}

/// Names are trimmed but never nulled; only a missing field stays `None`.
fn required_text(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string())
}

fn text_or_none(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
