// cloudrestore/src/presentation/mod.rs
use std::io::{Write, stdout};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::restore::logic::{Outcome, RestoreOrchestrator, SessionReport};

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreEvent {
    Progress(f64),
    Finished(Outcome),
}

/// Hands events from the worker to the presentation context.
pub trait EventSink: Send + Sync {
    fn send(&self, event: RestoreEvent);
}

impl EventSink for UnboundedSender<RestoreEvent> {
    fn send(&self, event: RestoreEvent) {
        // Unbounded: a slow or vanished receiver never stalls the worker.
        if UnboundedSender::send(self, event).is_err() {
            debug!("presentation receiver dropped; event discarded");
        }
    }
}

pub fn event_channel() -> (UnboundedSender<RestoreEvent>, UnboundedReceiver<RestoreEvent>) {
    unbounded_channel()
}

/// What the user sees while a restore runs.
pub trait RestoreView {
    fn show_progress(&mut self, progress: f64);

    /// Back to the pre-restore state: action enabled, progress hidden.
    fn restore_affordances(&mut self);
}

/// Picks the next screen once a session has ended.
pub trait Router {
    fn route(&mut self, outcome: &Outcome);
}

/// Runs on the presentation context until the terminal event arrives, then
/// routes it. Returns `None` if the worker went away without finishing.
pub async fn drive(
    events: &mut UnboundedReceiver<RestoreEvent>,
    view: &mut dyn RestoreView,
    router: &mut dyn Router,
) -> Option<Outcome> {
    while let Some(event) = events.recv().await {
        match event {
            RestoreEvent::Progress(value) => view.show_progress(value),
            RestoreEvent::Finished(outcome) => {
                if matches!(outcome, Outcome::Failed { .. }) {
                    view.restore_affordances();
                }
                router.route(&outcome);
                return Some(outcome);
            }
        }
    }
    None
}

/// Runs the orchestrator on a blocking worker thread.
pub fn spawn_session(
    orchestrator: RestoreOrchestrator,
    token: CancellationToken,
) -> tokio::task::JoinHandle<SessionReport> {
    tokio::task::spawn_blocking(move || orchestrator.run(&token))
}

/// Single-line percentage on stdout.
#[derive(Default)]
pub struct ConsoleView {
    last_percent: Option<u32>,
}

impl ConsoleView {
    pub fn new() -> Self {
        ConsoleView { last_percent: None }
    }
}

impl RestoreView for ConsoleView {
    fn show_progress(&mut self, progress: f64) {
        let percent = (progress * 100.0).round() as u32;
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        print!("\r🔄 Restoring... {:>3}%", percent);
        let _ = stdout().flush();
    }

    fn restore_affordances(&mut self) {
        if self.last_percent.take().is_some() {
            println!();
        }
        println!("↩️  Restore stopped. Run `restore` again to retry, or `skip` to continue without it.");
    }
}

pub struct ConsoleRouter;

impl Router for ConsoleRouter {
    fn route(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed => println!("\n➡️  Restore complete, opening conversations."),
            Outcome::Skipped => println!("➡️  Restore skipped, opening conversations."),
            Outcome::Failed { .. } => println!("➡️  Staying on the restore screen."),
        }
    }
}
