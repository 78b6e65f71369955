use std::path::PathBuf;

use tokio::sync::mpsc;

/// Notification sent from a running pipeline to whoever drives the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Progress {
        current: usize,
        total: usize,
        message: String,
    },
    Status(String),
    Finished(RunReport),
}

/// Terminal result of a session. Exactly one is sent per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Success { output: PathBuf, message: String },
    Failure { message: String },
    Cancelled,
}

/// How a pipeline ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(PathBuf),
    Cancelled,
}

impl RunOutcome {
    pub fn output(&self) -> Option<&PathBuf> {
        match self {
            Self::Completed(path) => Some(path),
            Self::Cancelled => None,
        }
    }
}

/// Sending half of a session's event channel.
///
/// Sends never fail: a receiver that went away simply stops listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn progress(&self, current: usize, total: usize, message: impl Into<String>) {
        self.send(RunEvent::Progress {
            current,
            total,
            message: message.into(),
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(RunEvent::Status(message.into()));
    }

    pub fn finished(&self, report: RunReport) {
        self.send(RunEvent::Finished(report));
    }

    fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// `int(current / total * 100)`, clamped to 100. A zero total reads as done.
pub fn percent(current: usize, total: usize) -> usize {
    if total == 0 {
        return 100;
    }
    ((current as u128 * 100) / total as u128).min(100) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_truncates_and_clamps() {
        assert_eq!(percent(0, 200), 0);
        assert_eq!(percent(199, 200), 99);
        assert_eq!(percent(200, 200), 100);
        assert_eq!(percent(250, 200), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn sink_delivers_in_order_and_tolerates_closed_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.progress(1, 2, "half");
        sink.status("ok");
        assert_eq!(
            rx.try_recv().ok(),
            Some(RunEvent::Progress {
                current: 1,
                total: 2,
                message: "half".to_string()
            })
        );
        assert_eq!(rx.try_recv().ok(), Some(RunEvent::Status("ok".to_string())));

        drop(rx);
        sink.finished(RunReport::Cancelled);
        EventSink::discard().status("nobody listens");
    }
}
