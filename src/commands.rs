//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lsquota_core::config::Settings;
use lsquota_core::quota::{QuotaClient, QuotaPoller, QuotaSnapshot};
use lsquota_core::runner::SystemRunner;
use lsquota_core::workspace::{normalize, PathStyle};
use lsquota_core::{
    DetectOptions, Detection, ProcessFinder, ProtocolClient, ReqwestTransport, TracingLogger,
};
use tracing::info;

type SystemFinder = ProcessFinder<SystemRunner, ReqwestTransport>;

fn finder(settings: &Settings) -> Result<SystemFinder> {
    let finder = ProcessFinder::system(settings.finder_settings())
        .context("Failed to create HTTP client")?
        .with_logger(Arc::new(TracingLogger));
    Ok(finder)
}

fn quota_client(settings: &Settings) -> Result<QuotaClient<ReqwestTransport>> {
    let client = ProtocolClient::system().context("Failed to create HTTP client")?;
    Ok(QuotaClient::new(client)
        .with_path(settings.server.quota_path.clone())
        .with_timeout(settings.request_timeout()))
}

fn options(settings: &Settings) -> DetectOptions {
    DetectOptions::new(settings.workspace_roots.clone())
}

/// Host the successful probe went to
fn detected_host(detection: &Detection, settings: &Settings) -> String {
    detection
        .diagnostics
        .attempts
        .last()
        .map(|a| a.host.clone())
        .unwrap_or_else(|| settings.server.host.clone())
}

async fn discover(settings: &Settings, json: bool) -> Result<Detection> {
    let finder = finder(settings)?;
    info!("Looking for {}", finder.process_name());

    match finder.detect(&options(settings)).await {
        Ok(detection) => Ok(detection),
        Err(failure) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&failure.diagnostics)?);
            } else {
                eprint!("{}", failure);
            }
            anyhow::bail!("Language server discovery failed: {}", failure.reason)
        }
    }
}

/// `lsquota detect`
pub async fn detect(settings: &Settings, json: bool) -> Result<()> {
    let detection = discover(settings, json).await?;
    let host = detected_host(&detection, settings);

    if json {
        let value = serde_json::json!({
            "host": host,
            "port": detection.descriptor.port(),
            "diagnostics": detection.diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let d = &detection.diagnostics;
        println!("Language server: {}:{}", host, detection.descriptor.port());
        if let Some(protocol) = d.protocol {
            println!("Protocol: {}", protocol.scheme());
        }
        if let Some(prefix) = &d.token_prefix {
            println!("Token: {}...", prefix);
        }
        println!(
            "Candidates: {}, probes: {}, retries: {}",
            d.candidate_count,
            d.attempts.len(),
            d.retry_count
        );
    }
    Ok(())
}

/// `lsquota quota`
pub async fn quota(settings: &Settings, json: bool) -> Result<()> {
    let detection = discover(settings, json).await?;
    let host = detected_host(&detection, settings);

    let snapshot = quota_client(settings)?
        .fetch(&host, &detection.descriptor)
        .await
        .context("Failed to fetch quotas")?;
    print_snapshot(&snapshot, json)
}

/// `lsquota watch`
pub async fn watch(settings: &Settings, json: bool) -> Result<()> {
    let poller = QuotaPoller::new(
        finder(settings)?,
        quota_client(settings)?,
        options(settings),
        settings.poll_interval(),
    );
    let mut rx = poller.start();

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.fetching {
                    continue;
                }
                if let Some(error) = &snapshot.error {
                    eprintln!("{}", error);
                } else {
                    print_snapshot(&snapshot, json)?;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// `lsquota workspace-id`
pub fn workspace_id(path: &Path, windows: bool) {
    let style = if windows {
        PathStyle::Windows
    } else {
        PathStyle::current()
    };
    println!("{}", normalize(&path.to_string_lossy(), style));
}

fn print_snapshot(snapshot: &QuotaSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
    } else {
        print!("{}", render_snapshot(snapshot, Utc::now()));
    }
    Ok(())
}

/// Text table of a snapshot; reset times relative to `now`
pub fn render_snapshot(snapshot: &QuotaSnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if let Some(plan) = &snapshot.plan {
        out.push_str(&format!("Plan: {}\n", plan));
    }
    if snapshot.models.is_empty() {
        out.push_str("No model quotas reported\n");
        return out;
    }

    let width = snapshot
        .models
        .iter()
        .map(|m| m.label.chars().count())
        .max()
        .unwrap_or(0);
    for model in &snapshot.models {
        let reset = match model.resets_in(now) {
            Some(d) if d.num_hours() > 0 => {
                format!("resets in {}h{:02}m", d.num_hours(), d.num_minutes() % 60)
            }
            Some(d) => format!("resets in {}m", d.num_minutes().max(1)),
            None => String::new(),
        };
        out.push_str(
            format!(
                "{:<width$}  {:>5.1}%  {}",
                model.label,
                model.remaining_percent,
                reset,
                width = width
            )
            .trim_end(),
        );
        out.push('\n');
    }
    if let Some(lowest) = snapshot.lowest().filter(|_| snapshot.models.len() > 1) {
        out.push_str(&format!(
            "Lowest: {} ({:.1}%)\n",
            lowest.label, lowest.remaining_percent
        ));
    }
    out
}
