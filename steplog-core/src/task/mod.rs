//! task/mod.rs - Task and step controllers feeding the pipeline.
//!
//! License: MIT OR APACHE 2.0

use log::{debug, info};
use serde::Serialize;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use steplog_mask::MaskSet;

use crate::config::{StreamSettings, DEFAULT_CHANNEL_CAPACITY};
use crate::errors::SteplogError;
use crate::fingerprint::mask_fingerprint;
use crate::stream::StreamCommand;
use crate::writer::WriterHandle;

pub mod layout;
pub mod status;
pub mod step;

pub use layout::{Layout, StepDestinations};
pub use status::StepStatus;
pub use step::{StepLogger, StepSummary};

#[derive(Serialize)]
struct TaskStatusRecord<'a> {
    status: StepStatus,
    task_id: &'a str,
    time: DateTime<Utc>,
}

/// A step the task still tracks: a weak handle on its log input, for late
/// masks, and a signal that resolves once the step is finished or dropped.
struct LiveStep {
    name: String,
    input: mpsc::WeakSender<StreamCommand>,
    done: oneshot::Receiver<()>,
}

impl LiveStep {
    fn is_streaming(&self) -> bool {
        self.input.upgrade().is_some_and(|tx| !tx.is_closed())
    }
}

pub struct TaskLogger {
    task_id: String,
    writer: WriterHandle,
    layout: Layout,
    settings: StreamSettings,
    blacklist: Vec<(String, String)>,
    status: StepStatus,
    live_steps: Vec<LiveStep>,
    capacity: usize,
}

impl TaskLogger {
    pub fn new(
        task_id: &str,
        writer: WriterHandle,
        blacklist: Vec<(String, String)>,
        layout: Layout,
        settings: StreamSettings,
    ) -> Self {
        info!("Task '{}' created with {} masks", task_id, blacklist.len());
        Self {
            task_id: task_id.to_string(),
            writer,
            layout,
            settings,
            blacklist,
            status: StepStatus::Pending,
            live_steps: Vec::new(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Capacity of the channels between stream stages.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    pub fn create_step(&mut self, name: &str) -> Result<StepLogger, SteplogError> {
        let destinations = self.layout.step(&self.task_id, name)?;
        let masks = MaskSet::from_blacklist(self.blacklist.iter().map(|(n, v)| (n, v)))?;
        let (done_tx, done_rx) = oneshot::channel();
        let step = StepLogger::start(
            name,
            destinations,
            masks,
            &self.settings,
            self.writer.clone(),
            self.capacity,
            done_tx,
        );
        self.live_steps.retain(LiveStep::is_streaming);
        self.live_steps.push(LiveStep {
            name: name.to_string(),
            input: step.log_sender().downgrade(),
            done: done_rx,
        });
        Ok(step)
    }

    /// Masks `value` in every step created from now on and in every step still
    /// streaming.
    pub async fn add_mask(&mut self, name: &str, value: &str) -> Result<(), SteplogError> {
        if value.is_empty() || self.blacklist.iter().any(|(_, v)| v == value) {
            return Ok(());
        }
        debug!("Task '{}' adding mask '{}' ({})", self.task_id, name, mask_fingerprint(value));
        self.blacklist.push((name.to_string(), value.to_string()));

        self.live_steps.retain(LiveStep::is_streaming);
        for step in &self.live_steps {
            let Some(tx) = step.input.upgrade() else {
                continue;
            };
            let command = StreamCommand::AddMask {
                name: name.to_string(),
                value: value.to_string(),
            };
            if tx.send(command).await.is_err() {
                debug!("Step '{}' ended before mask '{}' reached it", step.name, name);
            }
        }
        Ok(())
    }

    pub async fn set_status(&mut self, next: StepStatus) -> Result<(), SteplogError> {
        self.status = self.status.transition(&self.task_id, next)?;
        info!("Task '{}' is now {}", self.task_id, next);
        let destination = self.layout.task_status(&self.task_id)?;
        self.writer
            .write(&destination, &TaskStatusRecord {
                status: next,
                task_id: &self.task_id,
                time: Utc::now(),
            })
            .await
    }

    /// Waits until every step is finished or dropped, records `status` and
    /// flushes the writer. Returns the bytes written by the final flush.
    pub async fn finish(mut self, status: StepStatus) -> Result<usize, SteplogError> {
        for step in self.live_steps.drain(..) {
            debug!("Task '{}' waiting for step '{}'", self.task_id, step.name);
            if step.done.await.is_err() {
                debug!("Step '{}' was dropped without finishing", step.name);
            }
        }
        self.set_status(status).await?;
        self.writer.flush().await
    }
}
