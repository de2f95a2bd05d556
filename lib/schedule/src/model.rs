//! The schedule record: the unit the scheduler fires on.

use chrono::{DateTime, Utc};
use marketbeat_core::ScheduleId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

/// Overlap behavior for concurrent dispatches of the same task + kwargs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// No coordination; always run.
    #[default]
    Allow,
    /// Skip when an identical invocation is already running.
    Skip,
    /// Wait (bounded) for the running invocation to finish.
    Queue,
}

impl ExecutionPolicy {
    /// Returns the policy's wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Skip => "skip",
            Self::Queue => "queue",
        }
    }
}

impl std::str::FromStr for ExecutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "skip" => Ok(Self::Skip),
            "queue" => Ok(Self::Queue),
            other => Err(format!("unknown execution policy: {other}")),
        }
    }
}

/// A cron-scheduled, parameterized background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique identifier. Immutable; never reused after deletion.
    pub id: ScheduleId,
    /// Human label. Not globally unique.
    pub name: String,
    /// Key identifying which task implementation to invoke.
    pub task_name: String,
    /// Five-field cron expression in the configured zone.
    pub cron_expression: String,
    /// Disabled schedules are never fired.
    pub enabled: bool,
    /// Ordered positional parameters.
    pub args: Vec<JsonValue>,
    /// Keyed parameters.
    pub kwargs: serde_json::Map<String, JsonValue>,
    /// Free text.
    pub description: Option<String>,
    /// Optional classifier for filtering.
    pub category: Option<String>,
    /// Unordered tag set for filtering.
    pub tags: BTreeSet<String>,
    /// Overlap behavior.
    pub execution_policy: ExecutionPolicy,
    /// True when `name` was synthesized from task + params + frequency.
    pub auto_generated_name: bool,
    /// Server-assigned creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Server-assigned last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Creates a new enabled schedule with a synthesized name.
    #[must_use]
    pub fn new(task_name: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        let task_name = task_name.into();
        let cron_expression = cron_expression.into();
        let kwargs = serde_json::Map::new();
        let name = synthesize_name(&task_name, &kwargs, &cron_expression);
        let now = Utc::now();

        Self {
            id: ScheduleId::new(),
            name,
            task_name,
            cron_expression,
            enabled: true,
            args: Vec::new(),
            kwargs,
            description: None,
            category: None,
            tags: BTreeSet::new(),
            execution_policy: ExecutionPolicy::default(),
            auto_generated_name: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets an explicit name, clearing the auto-generated flag.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.auto_generated_name = false;
        self
    }

    /// Sets positional parameters.
    #[must_use]
    pub fn with_args(mut self, args: Vec<JsonValue>) -> Self {
        self.args = args;
        self
    }

    /// Sets keyed parameters, refreshing a synthesized name.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: serde_json::Map<String, JsonValue>) -> Self {
        self.kwargs = kwargs;
        if self.auto_generated_name {
            self.name = synthesize_name(&self.task_name, &self.kwargs, &self.cron_expression);
        }
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Sets the execution policy.
    #[must_use]
    pub fn with_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.execution_policy = policy;
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Marks the schedule as updated.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Synthesizes a label from task, parameters, and cron frequency.
///
/// The result looks like `fetch_listed_info_daily_9f3a2c1b`.
#[must_use]
pub fn synthesize_name(
    task_name: &str,
    kwargs: &serde_json::Map<String, JsonValue>,
    cron_expression: &str,
) -> String {
    let frequency = frequency_phrase(cron_expression);
    if kwargs.is_empty() {
        format!("{task_name}_{frequency}")
    } else {
        format!("{task_name}_{frequency}_{}", param_digest(kwargs))
    }
}

/// Classifies a five-field cron expression into a coarse frequency phrase.
fn frequency_phrase(cron_expression: &str) -> &'static str {
    let fields: Vec<&str> = cron_expression.split_whitespace().collect();
    let [minute, hour, dom, _month, dow] = fields.as_slice() else {
        return "custom";
    };

    let fixed = |f: &str| !f.contains(['*', '/']);

    if minute.starts_with("*") && *hour == "*" {
        "every_minute"
    } else if fixed(minute) && *hour == "*" && *dom == "*" && *dow == "*" {
        "hourly"
    } else if fixed(minute) && fixed(hour) && *dom == "*" && *dow == "*" {
        "daily"
    } else if fixed(minute) && fixed(hour) && *dom == "*" && fixed(dow) {
        "weekly"
    } else if fixed(minute) && fixed(hour) && fixed(dom) {
        "monthly"
    } else {
        "custom"
    }
}

/// Short stable digest of keyed parameters (FNV-1a over canonical JSON).
///
/// Used for synthesized names and for execution-policy lock keys, so two
/// schedules with identical kwargs produce the same digest.
#[must_use]
pub fn param_digest(kwargs: &serde_json::Map<String, JsonValue>) -> String {
    // serde_json::Map preserves insertion order; re-sort for stability.
    let canonical: std::collections::BTreeMap<&String, &JsonValue> = kwargs.iter().collect();
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{:08x}", (hash >> 32) as u32 ^ hash as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(pairs: &[(&str, JsonValue)]) -> serde_json::Map<String, JsonValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn new_schedule_has_synthesized_name() {
        let schedule = Schedule::new("fetch_listed_info", "0 9 * * *");
        assert_eq!(schedule.name, "fetch_listed_info_daily");
        assert!(schedule.auto_generated_name);
        assert!(schedule.enabled);
        assert_eq!(schedule.execution_policy, ExecutionPolicy::Allow);
    }

    #[test]
    fn explicit_name_clears_auto_flag() {
        let schedule = Schedule::new("noop", "* * * * *").with_name("my job");
        assert_eq!(schedule.name, "my job");
        assert!(!schedule.auto_generated_name);
    }

    #[test]
    fn kwargs_extend_synthesized_name() {
        let schedule = Schedule::new("fetch_listed_info", "0 9 * * *")
            .with_kwargs(kwargs(&[("period_type", json!("yesterday"))]));
        assert!(schedule.name.starts_with("fetch_listed_info_daily_"));
        assert!(schedule.auto_generated_name);
    }

    #[test]
    fn frequency_phrases() {
        assert_eq!(frequency_phrase("* * * * *"), "every_minute");
        assert_eq!(frequency_phrase("30 * * * *"), "hourly");
        assert_eq!(frequency_phrase("0 9 * * *"), "daily");
        assert_eq!(frequency_phrase("0 9 * * 1"), "weekly");
        assert_eq!(frequency_phrase("0 9 1 * *"), "monthly");
        assert_eq!(frequency_phrase("*/5 8-18 * * *"), "custom");
    }

    #[test]
    fn param_digest_is_order_insensitive() {
        let a = kwargs(&[("x", json!(1)), ("y", json!("b"))]);
        let b = kwargs(&[("y", json!("b")), ("x", json!(1))]);
        assert_eq!(param_digest(&a), param_digest(&b));
    }

    #[test]
    fn param_digest_differs_on_values() {
        let a = kwargs(&[("period_type", json!("yesterday"))]);
        let b = kwargs(&[("period_type", json!("7days"))]);
        assert_ne!(param_digest(&a), param_digest(&b));
    }

    #[test]
    fn execution_policy_round_trip() {
        for policy in [
            ExecutionPolicy::Allow,
            ExecutionPolicy::Skip,
            ExecutionPolicy::Queue,
        ] {
            let parsed: ExecutionPolicy = policy.as_str().parse().unwrap();
            assert_eq!(parsed, policy);
        }
        assert!("sometimes".parse::<ExecutionPolicy>().is_err());
    }

    #[test]
    fn schedule_serde_roundtrip() {
        let schedule = Schedule::new("noop", "* * * * *")
            .with_category("market_data")
            .with_tags(["listed".to_string(), "daily".to_string()])
            .with_execution_policy(ExecutionPolicy::Skip);

        let json = serde_json::to_string(&schedule).expect("serialize");
        let parsed: Schedule = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(parsed.id, schedule.id);
        assert_eq!(parsed.tags, schedule.tags);
        assert_eq!(parsed.execution_policy, ExecutionPolicy::Skip);
    }
}
