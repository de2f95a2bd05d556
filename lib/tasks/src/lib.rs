//! Built-in task implementations for marketbeat workers.
//!
//! The canonical task fetches listed-company information from the external
//! market-data API and upserts it into the data store. It exercises the
//! full worker-side contract: parameter parsing, authenticated fetch
//! through the rate limiter, validation, bulk upsert, and a structured
//! result summary.

pub mod fetch_listed_info;
pub mod listed_info;

pub use fetch_listed_info::{FETCH_LISTED_INFO, FetchListedInfoTask, FetchParams, PeriodType};
pub use listed_info::{ListedInfo, ListedInfoRepository};
