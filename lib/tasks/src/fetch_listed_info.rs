//! The canonical task: fetch listed-company info for a date range.
//!
//! Parameters arrive as schedule kwargs:
//!
//! - `period_type` (required): `yesterday`, `7days`, `30days`, or `custom`
//! - `from_date` / `to_date` (ISO dates, required for `custom`)
//! - `codes` (optional): list of four-character issue codes
//! - `market` (optional): market segment filter
//!
//! For each date in the resolved range the task GETs `/listed/info`,
//! validates the records, and bulk-upserts them keyed `(date, code)`. The
//! result summary is `{"fetched": N, "saved": M}`.

use crate::listed_info::{ListedInfo, ListedInfoRepository};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use marketbeat_integration::{MarketApiClient, RateLimiter};
use marketbeat_worker::{TaskError, TaskInvocation, TaskRegistry};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;

/// The registry name of this task.
pub const FETCH_LISTED_INFO: &str = "fetch_listed_info";

/// How the date range is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodType {
    /// The single previous day.
    Yesterday,
    /// The previous seven days.
    SevenDays,
    /// The previous thirty days.
    ThirtyDays,
    /// Explicit `from_date`..=`to_date`.
    Custom,
}

impl FromStr for PeriodType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yesterday" => Ok(Self::Yesterday),
            "7days" => Ok(Self::SevenDays),
            "30days" => Ok(Self::ThirtyDays),
            "custom" => Ok(Self::Custom),
            other => Err(TaskError::InvalidParameters {
                reason: format!(
                    "period_type must be one of yesterday/7days/30days/custom, got '{other}'"
                ),
            }),
        }
    }
}

/// Parsed and validated task parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchParams {
    /// Range derivation mode.
    pub period_type: PeriodType,
    /// Range start for `custom`.
    pub from_date: Option<NaiveDate>,
    /// Range end for `custom`.
    pub to_date: Option<NaiveDate>,
    /// Restrict the fetch to these issue codes.
    pub codes: Vec<String>,
    /// Restrict the fetch to one market segment.
    pub market: Option<String>,
}

impl FetchParams {
    /// Parses kwargs into parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing or malformed.
    pub fn from_invocation(invocation: &TaskInvocation) -> Result<Self, TaskError> {
        let period_type: PeriodType = invocation.required_str("period_type")?.parse()?;

        let parse_date = |key: &str| -> Result<Option<NaiveDate>, TaskError> {
            invocation
                .optional_str(key)
                .map(|raw| {
                    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                        TaskError::InvalidParameters {
                            reason: format!("'{key}' must be an ISO date: {e}"),
                        }
                    })
                })
                .transpose()
        };

        let from_date = parse_date("from_date")?;
        let to_date = parse_date("to_date")?;

        if period_type == PeriodType::Custom {
            match (from_date, to_date) {
                (Some(from), Some(to)) if to >= from => {}
                (Some(_), Some(_)) => {
                    return Err(TaskError::InvalidParameters {
                        reason: "to_date must not precede from_date".to_string(),
                    });
                }
                _ => {
                    return Err(TaskError::InvalidParameters {
                        reason: "custom period requires from_date and to_date".to_string(),
                    });
                }
            }
        }

        let codes = match invocation.kwargs.get("codes") {
            None => Vec::new(),
            Some(JsonValue::Array(values)) => {
                let mut codes = Vec::with_capacity(values.len());
                for value in values {
                    let code = value.as_str().unwrap_or_default();
                    if code.chars().count() != 4 {
                        return Err(TaskError::InvalidParameters {
                            reason: format!("codes entries must be 4 characters, got '{code}'"),
                        });
                    }
                    codes.push(code.to_string());
                }
                codes
            }
            Some(_) => {
                return Err(TaskError::InvalidParameters {
                    reason: "'codes' must be a list of strings".to_string(),
                });
            }
        };

        let market = invocation.optional_str("market").map(str::to_string);

        Ok(Self {
            period_type,
            from_date,
            to_date,
            codes,
            market,
        })
    }

    /// Resolves the inclusive date range relative to `today`.
    #[must_use]
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let yesterday = today - ChronoDuration::days(1);
        match self.period_type {
            PeriodType::Yesterday => (yesterday, yesterday),
            PeriodType::SevenDays => (today - ChronoDuration::days(7), yesterday),
            PeriodType::ThirtyDays => (today - ChronoDuration::days(30), yesterday),
            // from_invocation guarantees both bounds for Custom.
            PeriodType::Custom => (
                self.from_date.unwrap_or(yesterday),
                self.to_date.unwrap_or(yesterday),
            ),
        }
    }
}

/// The task implementation, sharing the API client, rate limiter, and
/// repository across invocations.
pub struct FetchListedInfoTask {
    client: Arc<MarketApiClient>,
    limiter: RateLimiter,
    repository: ListedInfoRepository,
}

impl FetchListedInfoTask {
    /// Creates the task.
    #[must_use]
    pub fn new(
        client: Arc<MarketApiClient>,
        limiter: RateLimiter,
        repository: ListedInfoRepository,
    ) -> Self {
        Self {
            client,
            limiter,
            repository,
        }
    }

    /// Registers this task under [`FETCH_LISTED_INFO`].
    pub fn register(self: Arc<Self>, registry: &mut TaskRegistry) {
        let task = Arc::clone(&self);
        registry.register(FETCH_LISTED_INFO, move |invocation| {
            let task = Arc::clone(&task);
            async move { task.run(invocation).await }
        });
    }

    /// Runs one invocation.
    ///
    /// # Errors
    ///
    /// Returns an error when parameters are invalid, the API fails past its
    /// bounded retries, or persistence fails.
    pub async fn run(&self, invocation: TaskInvocation) -> Result<JsonValue, TaskError> {
        let params = FetchParams::from_invocation(&invocation)?;
        let (from, to) = params.date_range(Utc::now().date_naive());

        let mut records: Vec<ListedInfo> = Vec::new();
        let mut fetched = 0_u64;
        let mut invalid = 0_u64;

        let mut date = from;
        while date <= to {
            for query in request_plans(date, &params) {
                self.limiter.acquire().await;

                let response = self
                    .client
                    .get_json("/listed/info", &query)
                    .await
                    .map_err(|e| TaskError::ExternalService {
                        reason: e.to_string(),
                    })?;

                for record in response
                    .get("info")
                    .and_then(JsonValue::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                {
                    fetched += 1;
                    match ListedInfo::from_api_record(date, record) {
                        Ok(info) => records.push(info),
                        Err(e) => {
                            invalid += 1;
                            tracing::warn!(%date, error = %e, "Skipping invalid listed record");
                        }
                    }
                }
            }
            date += ChronoDuration::days(1);
        }

        let saved = self
            .repository
            .upsert_many(&records)
            .await
            .map_err(|e| TaskError::Storage {
                message: e.to_string(),
            })?;

        tracing::info!(
            %from,
            %to,
            fetched,
            saved,
            invalid,
            "Listed info fetch finished"
        );

        Ok(serde_json::json!({"fetched": fetched, "saved": saved}))
    }
}

/// Builds the query list for one date: one request without codes, or one
/// request per configured code.
fn request_plans(date: NaiveDate, params: &FetchParams) -> Vec<Vec<(&'static str, String)>> {
    let date_param = date.format("%Y%m%d").to_string();

    let base = |extra: Option<(&'static str, String)>| {
        let mut query = vec![("date", date_param.clone())];
        if let Some(pair) = extra {
            query.push(pair);
        }
        if let Some(market) = &params.market {
            query.push(("market", market.clone()));
        }
        query
    };

    if params.codes.is_empty() {
        vec![base(None)]
    } else {
        params
            .codes
            .iter()
            .map(|code| base(Some(("code", code.clone()))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(pairs: &[(&str, JsonValue)]) -> TaskInvocation {
        let kwargs = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        TaskInvocation::new(Vec::new(), kwargs)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_type_is_required() {
        let result = FetchParams::from_invocation(&invocation(&[]));
        assert!(matches!(
            result,
            Err(TaskError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn yesterday_resolves_to_a_single_day() {
        let params =
            FetchParams::from_invocation(&invocation(&[("period_type", json!("yesterday"))]))
                .unwrap();

        let (from, to) = params.date_range(date(2024, 3, 4));
        assert_eq!(from, date(2024, 3, 3));
        assert_eq!(to, date(2024, 3, 3));
    }

    #[test]
    fn seven_days_ends_yesterday() {
        let params =
            FetchParams::from_invocation(&invocation(&[("period_type", json!("7days"))])).unwrap();

        let (from, to) = params.date_range(date(2024, 3, 10));
        assert_eq!(from, date(2024, 3, 3));
        assert_eq!(to, date(2024, 3, 9));
    }

    #[test]
    fn custom_requires_both_bounds_in_order() {
        let missing = invocation(&[("period_type", json!("custom"))]);
        assert!(FetchParams::from_invocation(&missing).is_err());

        let inverted = invocation(&[
            ("period_type", json!("custom")),
            ("from_date", json!("2024-03-10")),
            ("to_date", json!("2024-03-01")),
        ]);
        assert!(FetchParams::from_invocation(&inverted).is_err());

        let valid = invocation(&[
            ("period_type", json!("custom")),
            ("from_date", json!("2024-03-01")),
            ("to_date", json!("2024-03-10")),
        ]);
        let params = FetchParams::from_invocation(&valid).unwrap();
        let (from, to) = params.date_range(date(2024, 6, 1));
        assert_eq!(from, date(2024, 3, 1));
        assert_eq!(to, date(2024, 3, 10));
    }

    #[test]
    fn malformed_dates_and_codes_are_rejected() {
        let bad_date = invocation(&[
            ("period_type", json!("custom")),
            ("from_date", json!("03/01/2024")),
            ("to_date", json!("2024-03-10")),
        ]);
        assert!(FetchParams::from_invocation(&bad_date).is_err());

        let bad_code = invocation(&[
            ("period_type", json!("yesterday")),
            ("codes", json!(["7203", "123"])),
        ]);
        assert!(FetchParams::from_invocation(&bad_code).is_err());

        let not_a_list = invocation(&[
            ("period_type", json!("yesterday")),
            ("codes", json!("7203")),
        ]);
        assert!(FetchParams::from_invocation(&not_a_list).is_err());
    }

    #[test]
    fn unknown_period_type_is_rejected() {
        let result =
            FetchParams::from_invocation(&invocation(&[("period_type", json!("fortnight"))]));
        assert!(result.is_err());
    }

    #[test]
    fn request_plan_without_codes_is_one_call() {
        let params =
            FetchParams::from_invocation(&invocation(&[("period_type", json!("yesterday"))]))
                .unwrap();

        let plans = request_plans(date(2024, 3, 3), &params);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0], vec![("date", "20240303".to_string())]);
    }

    #[test]
    fn request_plan_fans_out_per_code_with_market() {
        let params = FetchParams::from_invocation(&invocation(&[
            ("period_type", json!("yesterday")),
            ("codes", json!(["7203", "9984"])),
            ("market", json!("prime")),
        ]))
        .unwrap();

        let plans = request_plans(date(2024, 3, 3), &params);
        assert_eq!(plans.len(), 2);
        assert_eq!(
            plans[0],
            vec![
                ("date", "20240303".to_string()),
                ("code", "7203".to_string()),
                ("market", "prime".to_string()),
            ]
        );
    }
}
