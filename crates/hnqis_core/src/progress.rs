use std::thread::sleep;
use std::time::Duration;

/// Seconds given to the operator to hit Ctrl-C before writes start.
pub const PREFLIGHT_PAUSE: Duration = Duration::from_secs(3);

/// Sink for the user-facing lines a run produces. Orchestrators receive one
/// explicitly instead of reaching for a global logger.
pub trait RunLog {
    /// Normal progress, e.g. `3/10 - Updated ...`.
    fn info(&mut self, line: &str);
    /// Something the operator should look at; the run continues.
    fn warn(&mut self, line: &str);
    /// Called once before the first remote write.
    fn pause_before_writes(&mut self);
}

/// Prints to stdout/stderr and mirrors every line into the tracing log file.
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    pause: Option<Duration>,
}

impl ConsoleLog {
    pub fn new(pause: bool) -> Self {
        Self {
            pause: pause.then_some(PREFLIGHT_PAUSE),
        }
    }
}

impl RunLog for ConsoleLog {
    fn info(&mut self, line: &str) {
        println!("{line}");
        tracing::info!("{line}");
    }

    fn warn(&mut self, line: &str) {
        eprintln!("{line}");
        tracing::warn!("{line}");
    }

    fn pause_before_writes(&mut self) {
        if let Some(pause) = self.pause {
            println!(
                "Sending changes in {}s, press Ctrl-C to abort...",
                pause.as_secs()
            );
            sleep(pause);
        }
    }
}

pub fn progress_line(index: usize, total: usize, summary: &str) -> String {
    format!("{index}/{total} - {summary}")
}
