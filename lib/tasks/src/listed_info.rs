//! Listed-company records and their upsert repository.

use chrono::{NaiveDate, Utc};
use marketbeat_worker::TaskError;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Rows per multi-value upsert statement.
const UPSERT_CHUNK: usize = 500;

/// One listed company on one date, keyed `(date, code)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedInfo {
    /// Trading date the record describes.
    pub date: NaiveDate,
    /// Four-character issue code.
    pub code: String,
    /// Company name.
    pub company_name: String,
    /// English company name, when the API provides one.
    pub company_name_english: Option<String>,
    /// Market segment code.
    pub market_code: Option<String>,
    /// Market segment name.
    pub market_name: Option<String>,
    /// Sector classification code.
    pub sector_code: Option<String>,
    /// Sector classification name.
    pub sector_name: Option<String>,
}

impl ListedInfo {
    /// Maps one API record onto the internal entity, validating the fields
    /// the data store keys on.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is not four characters or the company
    /// name is empty.
    pub fn from_api_record(date: NaiveDate, record: &JsonValue) -> Result<Self, TaskError> {
        let code = record
            .get("Code")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        if code.chars().count() != 4 {
            return Err(TaskError::InvalidParameters {
                reason: format!("record has malformed code '{code}'"),
            });
        }

        let company_name = record
            .get("CompanyName")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        if company_name.is_empty() {
            return Err(TaskError::InvalidParameters {
                reason: format!("record {code} has no company name"),
            });
        }

        let optional = |key: &str| {
            record
                .get(key)
                .and_then(JsonValue::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            date,
            code: code.to_string(),
            company_name: company_name.to_string(),
            company_name_english: optional("CompanyNameEnglish"),
            market_code: optional("MarketCode"),
            market_name: optional("MarketCodeName"),
            sector_code: optional("Sector17Code"),
            sector_name: optional("Sector17CodeName"),
        })
    }
}

/// Upsert repository over the task-owned `listed_info` table.
pub struct ListedInfoRepository {
    pool: PgPool,
}

impl ListedInfoRepository {
    /// Creates a repository over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts records keyed on `(date, code)` and returns how many rows
    /// were written. Duplicate fires land on the same keys, so re-running
    /// a fetch is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is partially
    /// written.
    pub async fn upsert_many(&self, records: &[ListedInfo]) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut saved = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in records.chunks(UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO listed_info (date, code, company_name, company_name_english, \
                 market_code, market_name, sector_code, sector_name, updated_at) ",
            );

            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.date)
                    .push_bind(&record.code)
                    .push_bind(&record.company_name)
                    .push_bind(&record.company_name_english)
                    .push_bind(&record.market_code)
                    .push_bind(&record.market_name)
                    .push_bind(&record.sector_code)
                    .push_bind(&record.sector_name)
                    .push_bind(now);
            });

            builder.push(
                " ON CONFLICT (date, code) DO UPDATE SET \
                 company_name = EXCLUDED.company_name, \
                 company_name_english = EXCLUDED.company_name_english, \
                 market_code = EXCLUDED.market_code, \
                 market_name = EXCLUDED.market_name, \
                 sector_code = EXCLUDED.sector_code, \
                 sector_name = EXCLUDED.sector_name, \
                 updated_at = EXCLUDED.updated_at",
            );

            let result = builder.build().execute(&mut *tx).await?;
            saved += result.rows_affected();
        }

        tx.commit().await?;
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn maps_a_full_api_record() {
        let record = json!({
            "Code": "7203",
            "CompanyName": "トヨタ自動車",
            "CompanyNameEnglish": "TOYOTA MOTOR CORPORATION",
            "MarketCode": "0111",
            "MarketCodeName": "プライム",
            "Sector17Code": "6",
            "Sector17CodeName": "自動車・輸送機"
        });

        let info = ListedInfo::from_api_record(sample_date(), &record).unwrap();
        assert_eq!(info.code, "7203");
        assert_eq!(info.company_name, "トヨタ自動車");
        assert_eq!(
            info.company_name_english.as_deref(),
            Some("TOYOTA MOTOR CORPORATION")
        );
        assert_eq!(info.market_code.as_deref(), Some("0111"));
    }

    #[test]
    fn empty_optional_fields_become_none() {
        let record = json!({
            "Code": "9984",
            "CompanyName": "ソフトバンクグループ",
            "CompanyNameEnglish": ""
        });

        let info = ListedInfo::from_api_record(sample_date(), &record).unwrap();
        assert!(info.company_name_english.is_none());
        assert!(info.market_code.is_none());
    }

    #[test]
    fn rejects_malformed_code() {
        let record = json!({"Code": "72030", "CompanyName": "x"});
        assert!(ListedInfo::from_api_record(sample_date(), &record).is_err());

        let record = json!({"CompanyName": "x"});
        assert!(ListedInfo::from_api_record(sample_date(), &record).is_err());
    }

    #[test]
    fn rejects_missing_company_name() {
        let record = json!({"Code": "7203"});
        assert!(ListedInfo::from_api_record(sample_date(), &record).is_err());
    }
}
