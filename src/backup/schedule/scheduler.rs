use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::schedule::{Frequency, ScheduleRule};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Work run each time a trigger fires.
pub trait ScheduledJob: Send + Sync {
    fn run(&self, frequency: Frequency);
}

impl<F: Fn(Frequency) + Send + Sync> ScheduledJob for F {
    fn run(&self, frequency: Frequency) {
        self(frequency)
    }
}

/// Next fire time strictly after the given instant.
type NextRun = Box<dyn Fn(&DateTime<Local>) -> Result<DateTime<Local>> + Send>;

fn cron_next_run(cron: String) -> NextRun {
    Box::new(move |after: &DateTime<Local>| {
        cron_parser::parse(&cron, after)
            .map_err(|e| Error::configuration(format!("Cannot compute next run of {:?}: {e:?}", cron)))
    })
}

/// Sleeps until each next run and fires `job`, until cancelled. A failing or
/// panicking run leaves the loop armed.
fn fire_loop(frequency: Frequency, next_run: NextRun, job: Arc<dyn ScheduledJob>, cancelled: Receiver<()>) {
    let mut after = Local::now();
    loop {
        let next = match next_run(&after) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!("{frequency} trigger stopped: {e}");
                return;
            }
        };
        tracing::info!("Next {frequency} backup at {next}");

        let wait = (next - Local::now()).to_std().unwrap_or_default();
        match cancelled.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::info!("Scheduled {frequency} backup triggered");
                if catch_unwind(AssertUnwindSafe(|| job.run(frequency))).is_err() {
                    tracing::error!("Scheduled {frequency} backup panicked, trigger stays armed");
                }
                after = next.max(Local::now());
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("{frequency} trigger cancelled");
                return;
            }
        }
    }
}

/// A thread sleeping until the next cron occurrence.
struct Trigger {
    cron: String,
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl Trigger {
    fn spawn(frequency: Frequency, cron: String, job: Arc<dyn ScheduledJob>) -> Result<Self> {
        let next_run = cron_next_run(cron.clone());
        Self::spawn_with(frequency, cron, next_run, job)
    }

    fn spawn_with(
        frequency: Frequency,
        cron: String,
        next_run: NextRun,
        job: Arc<dyn ScheduledJob>,
    ) -> Result<Self> {
        let (cancel, cancelled) = channel::<()>();
        let handle = std::thread::Builder::new()
            .name(format!("{frequency}-backup"))
            .spawn(move || fire_loop(frequency, next_run, job, cancelled))?;
        Ok(Self { cron, cancel, handle })
    }

    /// Stops the trigger. A run in progress finishes on its own.
    fn cancel(self) -> Result<()> {
        if self.handle.is_finished() {
            return Err(Error::configuration(format!(
                "Trigger {:?} had already stopped",
                self.cron
            )));
        }
        self.cancel.send(())?;
        Ok(())
    }
}

/// Owns the armed triggers, one per [`Frequency`].
pub struct Scheduler {
    job: Arc<dyn ScheduledJob>,
    triggers: HashMap<Frequency, Trigger>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn ScheduledJob>) -> Self {
        Self {
            job,
            triggers: HashMap::new(),
        }
    }

    /// Arms `rule`, replacing any trigger of the same frequency.
    pub fn set_schedule(&mut self, rule: &ScheduleRule) -> Result<()> {
        let cron = rule.validated_cron()?;
        tracing::info!("Setting {} schedule at {} ({})", rule.frequency, rule.time(), cron);

        if let Some(old) = self.triggers.remove(&rule.frequency) {
            tracing::info!("Cancelling existing {} trigger {:?}", rule.frequency, old.cron);
            if let Err(e) = old.cancel() {
                tracing::warn!("Cancelling old {} trigger failed: {e}", rule.frequency);
            }
        }

        let trigger = Trigger::spawn(rule.frequency, cron, self.job.clone())?;
        self.triggers.insert(rule.frequency, trigger);
        Ok(())
    }

    /// Cancels every trigger. Individual failures are logged.
    pub fn clear_schedule(&mut self) {
        tracing::info!("Clearing {} scheduled triggers", self.triggers.len());
        for (frequency, trigger) in self.triggers.drain() {
            if let Err(e) = trigger.cancel() {
                tracing::warn!("Cancelling {frequency} trigger failed: {e}");
            }
        }
    }

    /// Cron expression of the armed trigger for `frequency`.
    pub fn cron_of(&self, frequency: Frequency) -> Option<&str> {
        self.triggers.get(&frequency).map(|t| t.cron.as_str())
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Blocks until every trigger thread has exited.
    pub fn wait(mut self) {
        for (frequency, trigger) in self.triggers.drain() {
            if trigger.handle.join().is_err() {
                tracing::error!("{frequency} trigger thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.clear_schedule();
    }
}
