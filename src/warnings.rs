use std::time::Instant;

use crate::config;

pub(crate) enum RuntimeWarning<'a> {
    /// a blocking progress call (wait, fence, barrier) has not completed within the deadlock timeout
    ProgressTimeout(&'a str, f64),
    /// the runtime was shut down with requests still in flight
    PrematureShutdown(usize),
}

impl<'a> RuntimeWarning<'a> {
    fn print_warning(&self) -> bool {
        match self {
            RuntimeWarning::ProgressTimeout(_, elapsed) => {
                config().wait_warning.unwrap_or(true)
                    && config().deadlock_timeout > 0.0
                    && *elapsed > config().deadlock_timeout
            }
            RuntimeWarning::PrematureShutdown(cnt) => *cnt > 0,
        }
    }

    pub(crate) fn print(self) {
        if self.print_warning() {
            match self {
                RuntimeWarning::ProgressTimeout(op, elapsed) => {
                    tracing::warn!(
                        op,
                        elapsed,
                        timeout = config().deadlock_timeout,
                        "potential deadlock detected: {op} has not completed. \
                        All ranks targeted since the last fence must keep calling advance (or wait, fence, barrier) \
                        for messages to be delivered. Set AMREPLAY_DEADLOCK_TIMEOUT to change the timeout \
                        or AMREPLAY_WAIT_WARNING=false to disable this warning."
                    );
                }
                RuntimeWarning::PrematureShutdown(cnt) => {
                    tracing::warn!(
                        pending = cnt,
                        "premature release of the active message runtime left {cnt} requests unhandled"
                    );
                }
            }
        }
    }
}

/// Tracks how long a blocking loop has been spinning and emits a
/// [RuntimeWarning::ProgressTimeout] once per timeout period.
pub(crate) struct DeadlockWatch<'a> {
    op: &'a str,
    start: Instant,
}

impl<'a> DeadlockWatch<'a> {
    pub(crate) fn new(op: &'a str) -> Self {
        DeadlockWatch {
            op,
            start: Instant::now(),
        }
    }

    pub(crate) fn check(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        if config().deadlock_timeout > 0.0 && elapsed > config().deadlock_timeout {
            RuntimeWarning::ProgressTimeout(self.op, elapsed).print();
            self.start = Instant::now();
        }
    }
}
