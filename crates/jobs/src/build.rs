use std::{future::Future, time::Duration};

use gcb_ci_cloud::{BuildService, models::Build};
use gcb_ci_core::{
    models::{BuildDefinition, Substitutions},
    retry::RetryPolicy,
};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Convert a configured timeout (`600`, `"600s"`, `"20m"`, `"1.5h"`) to a protobuf duration string.
pub fn normalize_timeout(value: &Value) -> Option<String> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            let (number, unit) = match s.char_indices().last()? {
                (i, 's') => (&s[..i], 1.0),
                (i, 'm') => (&s[..i], 60.0),
                (i, 'h') => (&s[..i], 3600.0),
                _ => (s, 1.0),
            };
            number.trim().parse::<f64>().ok()? * unit
        }
        _ => return None,
    };
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let millis = (seconds * 1000.0).round() as u64;
    Some(if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}.{:03}s", millis / 1000, millis % 1000)
    })
}

/// Complete a repository's build configuration with its source archive and substitutions.
pub fn prepare_definition(
    config: &BuildDefinition,
    substitutions: &Substitutions,
    bucket: &str,
    object: &str,
) -> BuildDefinition {
    let mut definition = config.clone();
    definition.insert("source".into(), json!({ "storageSource": { "bucket": bucket, "object": object } }));
    definition.insert("logsBucket".into(), Value::String(format!("gs://{bucket}")));

    let options = definition.entry("options").or_insert_with(|| json!({}));
    if !options.is_object() {
        *options = json!({});
    }
    options["substitutionOption"] = Value::String("ALLOW_LOOSE".into());

    let merged = definition.entry("substitutions").or_insert_with(|| json!({}));
    if !merged.is_object() {
        *merged = json!({});
    }
    for (key, value) in substitutions.to_map() {
        merged[key] = Value::String(value);
    }

    if let Some(timeout) = definition.get("timeout").cloned() {
        match normalize_timeout(&timeout) {
            Some(normalized) => {
                definition.insert("timeout".into(), Value::String(normalized));
            }
            None => {
                tracing::warn!("Ignoring unrecognized build timeout {}", timeout);
                definition.remove("timeout");
            }
        }
    }
    definition
}

/// Submit a build, retrying transient failures. `None` once the attempts are exhausted.
pub async fn trigger(builds: &dyn BuildService, retry: &RetryPolicy, definition: &BuildDefinition) -> Option<Build> {
    tracing::info!("Sending build request");
    match retry.run("Build submission", |_| builds.create_build(definition)).await {
        Ok(build) => {
            tracing::info!(build = %build.id, "Build triggered");
            Some(build)
        }
        Err(e) => {
            tracing::error!("Failed to trigger build: {:#}", e);
            None
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Finished(Build),
    /// The wall-clock budget ran out first.
    TimedOut(Build),
    Cancelled(Build),
    /// Status could not be fetched within the retry ceiling.
    Unavailable(anyhow::Error),
}

pub struct PollSettings<'a> {
    pub interval: Duration,
    pub budget: Duration,
    pub retry: &'a RetryPolicy,
    pub token: &'a CancellationToken,
}

/// Re-fetch the build until it reaches a terminal status, calling `on_tick` with every
/// intermediate state.
pub async fn poll<F, Fut>(
    builds: &dyn BuildService,
    build: Build,
    settings: PollSettings<'_>,
    mut on_tick: F,
) -> PollOutcome
where
    F: FnMut(Build) -> Fut,
    Fut: Future<Output = ()>,
{
    let deadline = Instant::now() + settings.budget;
    let id = build.id.clone();
    loop {
        let build = match settings.retry.run("Build status", |_| builds.get_build(&id)).await {
            Ok(build) => build,
            Err(e) => return PollOutcome::Unavailable(e),
        };
        if build.status.is_terminal() {
            tracing::info!(build = %id, status = %build.status, "Build finished");
            return PollOutcome::Finished(build);
        }
        tracing::debug!(build = %id, status = %build.status, "Build running");
        on_tick(build.clone()).await;

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(build = %id, "Build exceeded {}s budget", settings.budget.as_secs());
            return PollOutcome::TimedOut(build);
        }
        tokio::select! {
            biased;
            _ = settings.token.cancelled() => return PollOutcome::Cancelled(build),
            _ = tokio::time::sleep(settings.interval.min(deadline - now)) => {}
        }
    }
}
