//! Quota data types parsed from the `GetUserStatus` response.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Remaining quota of one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelQuota {
    /// Display label (e.g., "Gemini 3 Pro (High)")
    pub label: String,
    /// Internal model identifier, if reported
    pub model_id: Option<String>,
    /// Remaining share of the quota window (0-100)
    pub remaining_percent: f64,
    /// When the quota window resets
    pub reset_time: Option<DateTime<Utc>>,
}

impl ModelQuota {
    pub fn is_exhausted(&self) -> bool {
        self.remaining_percent <= 0.0
    }

    /// Time left until reset, relative to `now`
    pub fn resets_in(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.reset_time.map(|t| t - now).filter(|d| *d > chrono::Duration::zero())
    }
}

/// Complete quota snapshot for one poll
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    /// Per-model quotas in server order
    pub models: Vec<ModelQuota>,
    /// Plan name (e.g., "Pro")
    pub plan: Option<String>,
    /// When this snapshot was captured
    pub fetched_at: Option<DateTime<Utc>>,
    /// Whether a fetch is currently in progress
    #[serde(skip)]
    pub fetching: bool,
    /// Error message from last fetch attempt
    pub error: Option<String>,
}

impl QuotaSnapshot {
    /// Model with the least quota left
    pub fn lowest(&self) -> Option<&ModelQuota> {
        self.models
            .iter()
            .min_by(|a, b| a.remaining_percent.total_cmp(&b.remaining_percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quota(label: &str, remaining_percent: f64) -> ModelQuota {
        ModelQuota {
            label: label.to_string(),
            model_id: None,
            remaining_percent,
            reset_time: None,
        }
    }

    #[test]
    fn test_lowest() {
        let snapshot = QuotaSnapshot {
            models: vec![quota("a", 80.0), quota("b", 0.0), quota("c", 35.5)],
            ..Default::default()
        };
        assert_eq!(snapshot.lowest().map(|m| m.label.as_str()), Some("b"));
        assert!(snapshot.models[1].is_exhausted());
        assert!(QuotaSnapshot::default().lowest().is_none());
    }

    #[test]
    fn test_resets_in() {
        let now = Utc.with_ymd_and_hms(2025, 11, 20, 10, 0, 0).unwrap();
        let mut q = quota("a", 50.0);
        q.reset_time = Some(Utc.with_ymd_and_hms(2025, 11, 20, 12, 30, 0).unwrap());
        assert_eq!(q.resets_in(now), Some(chrono::Duration::minutes(150)));

        q.reset_time = Some(Utc.with_ymd_and_hms(2025, 11, 20, 9, 0, 0).unwrap());
        assert_eq!(q.resets_in(now), None);
    }
}
