pub mod completions;
pub mod diff;
pub mod down;
pub mod man_pages;
pub mod refresh;
pub mod status;
pub mod up;

use indicatif::{ProgressBar, ProgressStyle};
use jumppad_core::{
    CancellationToken, CoreError, Engine, EngineConfig, Event, EventSink, Registry, Report,
};
use jumppad_runtime::Clients;
use jumppad_schema::Status;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STATE_ERROR: u8 = 3;

/// A command that could not complete, with the exit code it maps to.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = if e.is_state_error() {
            EXIT_STATE_ERROR
        } else if matches!(e, CoreError::Config(_) | CoreError::Schema(_)) {
            EXIT_CONFIG_ERROR
        } else {
            EXIT_FAILURE
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self {
            code: EXIT_FAILURE,
            message,
        }
    }
}

/// Global flags every command sees.
#[derive(Debug, Clone)]
pub struct Context {
    pub home: PathBuf,
    pub json: bool,
    pub cancel: CancellationToken,
}

impl Context {
    /// An engine over the host's container tooling, configured from
    /// `<home>/config.toml`.
    pub fn engine(&self, events: Option<EventSink>) -> Result<Engine, Failure> {
        let config = EngineConfig::load(&self.home)?;
        let engine = Engine::new(config, Registry::builtin(), Clients::system())
            .with_cancellation(self.cancel.clone());
        Ok(match events {
            Some(sink) => engine.with_events(sink),
            None => engine,
        })
    }

    /// A spinner for long running commands, unless output is JSON.
    pub fn progress(&self, msg: &str) -> Option<ProgressBar> {
        (!self.json).then(|| spinner(msg))
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Forward engine events to `pb`: work in flight becomes the spinner
/// message, finished resources are printed above it.
pub fn progress_sink(pb: &ProgressBar) -> EventSink {
    let pb = pb.clone();
    Arc::new(move |event: &Event| match event {
        Event::Parsed { .. }
        | Event::Creating(_)
        | Event::Destroying(_)
        | Event::Refreshing(_) => pb.set_message(event.to_string()),
        Event::Created(_) | Event::Destroyed(_) => pb.println(format!("  ✓ {event}")),
        Event::CreateFailed { .. } | Event::DestroyFailed { .. } => {
            pb.println(format!("  ✗ {event}"));
        }
    })
}

/// Run `f` under an optional spinner that tracks engine events.
pub fn with_progress(
    ctx: &Context,
    msg: &str,
    f: impl FnOnce(&Engine) -> Result<Report, CoreError>,
) -> Result<Report, Failure> {
    let pb = ctx.progress(msg);
    let engine = ctx.engine(pb.as_ref().map(progress_sink))?;
    let result = f(&engine);
    if let Some(pb) = &pb {
        match &result {
            Ok(report) if report.is_success() => spin_ok(pb, msg.trim_end_matches('.')),
            _ => spin_fail(pb, msg.trim_end_matches('.')),
        }
    }
    Ok(result?)
}

pub fn colorize_status(status: Status) -> String {
    use console::Style;
    let text = status.to_string();
    match status {
        Status::Applied => Style::new().green().apply_to(text).to_string(),
        Status::Failed => Style::new().red().bold().apply_to(text).to_string(),
        Status::PendingCreation | Status::PendingUpdate | Status::PendingModification => {
            Style::new().yellow().apply_to(text).to_string()
        }
        Status::Disabled | Status::Destroyed => Style::new().dim().apply_to(text).to_string(),
    }
}

/// Print the outcome of a walk and turn it into an exit code.
pub fn print_report(report: &Report, json: bool) -> Result<u8, Failure> {
    if json {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|f| serde_json::json!({ "id": f.id, "error": f.error.to_string() }))
            .collect();
        let payload = serde_json::json!({
            "succeeded": report.succeeded,
            "unchanged": report.unchanged,
            "failed": failed,
            "pending": report.skipped,
            "cancelled": report.cancelled,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if !report.succeeded.is_empty() {
            println!("succeeded:");
            for id in &report.succeeded {
                println!("  {id}");
            }
        }
        if !report.failed.is_empty() {
            println!("failed:");
            for failure in &report.failed {
                println!("  {}: {}", failure.id, failure.error);
            }
        }
        if !report.skipped.is_empty() {
            println!("pending:");
            for id in &report.skipped {
                println!("  {id}");
            }
        }
        println!(
            "{} succeeded, {} unchanged, {} failed, {} pending{}",
            report.succeeded.len(),
            report.unchanged.len(),
            report.failed.len(),
            report.skipped.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
    }
    Ok(if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumppad_core::{ConfigError, NodeFailure, ProviderError};
    use jumppad_schema::ResourceId;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
        assert_ne!(EXIT_CONFIG_ERROR, EXIT_STATE_ERROR);
    }

    #[test]
    fn failures_map_to_exit_codes() {
        let config: Failure = CoreError::Config(ConfigError::Blueprint("bad".to_owned())).into();
        assert_eq!(config.code, EXIT_CONFIG_ERROR);
        assert!(config.message.contains("bad"));

        let state: Failure =
            CoreError::Store(jumppad_store::StoreError::LockFailed("held".to_owned())).into();
        assert_eq!(state.code, EXIT_STATE_ERROR);

        let other: Failure = CoreError::Cancelled.into();
        assert_eq!(other.code, EXIT_FAILURE);
        assert_eq!(Failure::from("boom".to_owned()).code, EXIT_FAILURE);
    }

    #[test]
    fn colorize_status_keeps_text() {
        assert!(colorize_status(Status::Applied).contains("applied"));
        assert!(colorize_status(Status::PendingUpdate).contains("pending_update"));
        assert!(colorize_status(Status::Disabled).contains("disabled"));
    }

    #[test]
    fn report_exit_code() {
        let ok = Report {
            succeeded: vec![ResourceId::new("resource.network.n")],
            ..Report::default()
        };
        assert_eq!(print_report(&ok, true).unwrap(), EXIT_SUCCESS);

        let failed = Report {
            failed: vec![NodeFailure {
                id: ResourceId::new("resource.container.c"),
                error: ProviderError::internal("boom"),
            }],
            ..Report::default()
        };
        assert_eq!(print_report(&failed, false).unwrap(), EXIT_FAILURE);

        let cancelled = Report {
            cancelled: true,
            ..Report::default()
        };
        assert_eq!(print_report(&cancelled, false).unwrap(), EXIT_FAILURE);
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
