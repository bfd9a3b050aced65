use std::fmt::Write;

use gcb_ci_cloud::models::Build;
use gcb_ci_core::{
    models::BuildStatus,
    util::{format_step_duration, format_timestamp},
};

fn header(build: &Build, out: &mut String) {
    let log_url = build.log_url.as_deref().unwrap_or_default();
    let _ = writeln!(out, "#### ID: [{}]({})", build.id, log_url);
    let _ = writeln!(out, "##### Status: {}", build.status);
    if let Some(created) = build.create_time {
        let _ = writeln!(out, "##### Created At: {}", format_timestamp(created));
    }
    if let Some(started) = build.start_time {
        let _ = writeln!(out, "##### Started At: {}", format_timestamp(started));
    }
}

/// Summary published while the build is running.
pub fn progress_summary(build: &Build) -> String {
    let mut out = String::new();
    header(build, &mut out);
    out
}

fn step_mark(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Success => ":heavy_check_mark:",
        s if s.is_unexecuted() => ":warning:",
        _ => ":x:",
    }
}

/// Final report: build metadata, a table of steps and the images produced.
pub fn build_summary(build: &Build) -> String {
    let mut out = String::new();
    header(build, &mut out);
    if let Some(finished) = build.finish_time {
        let _ = writeln!(out, "##### Ended At: {}", format_timestamp(finished));
    }
    out.push_str("\n\n### Steps\n");
    out.push_str("| status             | name                         | time |\n");
    out.push_str("|--------------------|------------------------------|------|\n");
    for step in &build.steps {
        let time = step
            .timing
            .as_ref()
            .and_then(|t| t.duration())
            .map(format_step_duration)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "|{}|`{}`|{}|", step_mark(step.status), step.name, time);
    }
    out.push_str("<br/>\n");
    if !build.results.images.is_empty() {
        out.push_str("### Images");
        for (i, image) in build.results.images.iter().enumerate() {
            let _ = write!(out, "\n{} `{}`", i + 1, image.name);
        }
    }
    out
}
