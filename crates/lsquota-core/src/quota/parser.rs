//! Parse the `GetUserStatus` JSON response.
//!
//! The server speaks proto3 JSON: fields at their default value are left
//! out, so a quota with no `remainingFraction` is an exhausted quota.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{ModelQuota, QuotaSnapshot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatusResponse {
    user_status: Option<UserStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatus {
    plan_status: Option<PlanStatus>,
    cascade_model_config_data: Option<ModelConfigData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanStatus {
    plan_info: Option<PlanInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanInfo {
    plan_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelConfigData {
    #[serde(default)]
    client_model_configs: Vec<ClientModelConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientModelConfig {
    label: Option<String>,
    model_or_alias: Option<ModelOrAlias>,
    quota_info: Option<QuotaInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelOrAlias {
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaInfo {
    remaining_fraction: Option<f64>,
    reset_time: Option<String>,
}

/// Parse a `GetUserStatus` body into a snapshot.
///
/// Models without quota information are skipped.
pub fn parse_user_status(body: &str) -> Result<QuotaSnapshot, serde_json::Error> {
    let response: UserStatusResponse = serde_json::from_str(body)?;
    let Some(status) = response.user_status else {
        return Ok(QuotaSnapshot {
            fetched_at: Some(Utc::now()),
            ..Default::default()
        });
    };

    let plan = status
        .plan_status
        .and_then(|p| p.plan_info)
        .and_then(|i| i.plan_name);

    let models = status
        .cascade_model_config_data
        .map(|d| d.client_model_configs)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|config| {
            let quota = config.quota_info?;
            let model_id = config.model_or_alias.and_then(|m| m.model);
            let label = config
                .label
                .or_else(|| model_id.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let fraction = quota.remaining_fraction.unwrap_or(0.0).clamp(0.0, 1.0);

            Some(ModelQuota {
                label,
                model_id,
                remaining_percent: fraction * 100.0,
                reset_time: quota.reset_time.as_deref().and_then(parse_reset_time),
            })
        })
        .collect();

    Ok(QuotaSnapshot {
        models,
        plan,
        fetched_at: Some(Utc::now()),
        fetching: false,
        error: None,
    })
}

fn parse_reset_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
