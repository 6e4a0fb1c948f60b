//! Progress lines on stdout.

use berth_core::domain::MigrationEvent;
use berth_core::ports::EventSink;

/// Prints each event as it happens: a short line, or one JSON object per
/// line with `--json`.
pub struct StdoutReporter {
    json: bool,
}

impl StdoutReporter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

pub fn format_event(event: &MigrationEvent) -> String {
    match event {
        MigrationEvent::Inspected { topology } => format!("topology: {topology}"),
        MigrationEvent::PhaseEntered { phase, .. } => format!("==> {phase}"),
        MigrationEvent::Warning(w) => {
            let risk = if w.data_loss_risk { " (data loss risk)" } else { "" };
            format!("warning [{}]{risk}: {}", w.phase, w.message)
        }
        MigrationEvent::CancelDeferred { phase } => {
            format!("interrupt received in {phase}; cutover has started, finishing the attempt")
        }
        MigrationEvent::RolledBack { workload, replicas } => {
            format!("rolled back: {workload} scaled to {replicas}")
        }
        MigrationEvent::Failed { phase, kind, .. } => format!("!!! {phase} failed ({kind})"),
        MigrationEvent::Completed { .. } => "==> complete".to_string(),
        MigrationEvent::AlreadyMigrated => "nothing to do".to_string(),
    }
}

impl EventSink for StdoutReporter {
    fn emit(&self, event: &MigrationEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "could not encode event"),
            }
        } else {
            println!("{}", format_event(event));
        }
    }
}
