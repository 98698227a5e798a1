//! Core domain model for HHDB: shaped employer and vacancy records.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "hhdb-core";

/// Upstream employer identifier. Addresses the API only, never a primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployerId(pub u64);

impl fmt::Display for EmployerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EmployerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u64> for EmployerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lower bound of a posted salary range together with its currency.
///
/// Holding both in one value keeps the persisted `salary`/`currency` columns
/// either both null or both set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salary {
    pub amount: i32,
    pub currency: String,
}

impl Salary {
    /// Builds a salary from the upstream range. A missing lower bound or
    /// currency yields no salary at all, whatever the upper bound says.
    pub fn from_lower_bound(from: Option<i32>, currency: Option<String>) -> Option<Self> {
        match (from, currency) {
            (Some(amount), Some(currency)) if !currency.trim().is_empty() => {
                Some(Self { amount, currency })
            }
            _ => None,
        }
    }
}

/// Shaped employer profile, ready for the `employers` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Employer {
    pub name: Option<String>,
    pub area: Option<String>,
    pub page_url: Option<String>,
    pub website: Option<String>,
    pub open_vacancies: Option<i32>,
}

/// Shaped vacancy, ready for the `vacancies` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Vacancy {
    /// Upstream id, kept for logs only.
    pub source_id: Option<String>,
    pub name: Option<String>,
    pub published_at: Option<NaiveDate>,
    pub employment: Option<String>,
    pub schedule: Option<String>,
    pub vacancy_type: Option<String>,
    pub area: Option<String>,
    pub url: Option<String>,
    pub salary: Option<Salary>,
}

impl Vacancy {
    pub fn salary_amount(&self) -> Option<i32> {
        self.salary.as_ref().map(|s| s.amount)
    }

    pub fn currency(&self) -> Option<&str> {
        self.salary.as_ref().map(|s| s.currency.as_str())
    }
}

/// One employer with its vacancies in page order, then within-page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployerAggregate {
    pub employer_id: EmployerId,
    pub employer: Employer,
    pub vacancies: Vec<Vacancy>,
}

impl EmployerAggregate {
    pub fn new(employer_id: EmployerId, employer: Employer) -> Self {
        Self {
            employer_id,
            employer,
            vacancies: Vec::new(),
        }
    }
}

pub fn count_vacancies(aggregates: &[EmployerAggregate]) -> usize {
    aggregates.iter().map(|a| a.vacancies.len()).sum()
}
