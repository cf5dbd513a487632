//! Boot sequencer.
//!
//! Feeds invocations to the dispatcher one at a time. Command failures are
//! logged and the sequence continues. A terminal result is handed to the
//! power control and ends the sequence for good: nothing is dispatched after
//! it, including commands passed to later `run` calls.

use crate::builtins::Builtins;
use crate::dispatch::{CommandInvocation, Dispatcher, Flow};
use std::time::Instant;

/// What happened during a `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceReport {
    /// Commands handed to the dispatcher
    pub executed: usize,
    /// Failed commands with their error text
    pub failures: Vec<(String, String)>,
    /// Shutdown reason if a command ended the boot
    pub terminal_reason: Option<String>,
    /// Commands skipped because the device is going down
    pub skipped: usize,
}

pub struct BootSequencer {
    dispatcher: Dispatcher,
    builtins: Builtins,
    halted: bool,
}

impl BootSequencer {
    pub fn new(dispatcher: Dispatcher, builtins: Builtins) -> Self {
        Self {
            dispatcher,
            builtins,
            halted: false,
        }
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// True once a shutdown was requested
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Run `invocations` in order until the list ends or the boot is terminated
    pub fn run<I>(&mut self, invocations: I) -> SequenceReport
    where
        I: IntoIterator<Item = CommandInvocation>,
    {
        let mut report = SequenceReport::default();

        for invocation in invocations {
            if self.halted {
                report.skipped += 1;
                continue;
            }

            report.executed += 1;
            let started = Instant::now();
            let result = self.dispatcher.dispatch(&mut self.builtins, &invocation);
            log::debug!(
                "Command '{}' took {}ms",
                invocation,
                started.elapsed().as_millis()
            );

            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Terminal { reason }) => {
                    log::warn!("Command '{}' requested shutdown: {}", invocation, reason);
                    self.builtins.platform().power.shutdown(&reason);
                    report.terminal_reason = Some(reason);
                    self.halted = true;
                    continue;
                }
                Err(e) => {
                    log::error!("Command '{}' failed: {}", invocation, e);
                    report.failures.push((invocation.to_string(), e.to_string()));
                }
            }

            // A completion callback may have started a shutdown on its own
            if self.builtins.platform().power.is_shutting_down() {
                log::warn!("Shutdown in progress after '{}'; stopping", invocation);
                self.halted = true;
            }
        }

        report
    }
}
