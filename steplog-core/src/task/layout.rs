// steplog-core/src/task/layout.rs
//! Where each kind of record is written, rendered from templates in the
//! `layout` section of the configuration.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::config::LayoutConfig;
use crate::errors::SteplogError;

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    task_status: String,
    step_logs: String,
    step_status: String,
    step_log_size: String,
    step_memory: String,
    step_cpu: String,
    step_disk: String,
}

/// Rendered destinations for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDestinations {
    pub logs: String,
    pub status: String,
    pub log_size: String,
    pub memory: String,
    pub cpu: String,
    pub disk: String,
}

#[derive(Serialize)]
struct DestinationContext<'a> {
    task_id: &'a str,
    step: &'a str,
}

impl Layout {
    pub fn from_config(config: &LayoutConfig) -> Result<Self, SteplogError> {
        fn required(value: &Option<String>, field: &'static str) -> Result<String, SteplogError> {
            value.clone().ok_or(SteplogError::MissingConfig(field))
        }
        Ok(Self {
            task_status: required(&config.task_status, "layout.task_status")?,
            step_logs: required(&config.step_logs, "layout.step_logs")?,
            step_status: required(&config.step_status, "layout.step_status")?,
            step_log_size: required(&config.step_log_size, "layout.step_log_size")?,
            step_memory: required(&config.step_memory, "layout.step_memory")?,
            step_cpu: required(&config.step_cpu, "layout.step_cpu")?,
            step_disk: required(&config.step_disk, "layout.step_disk")?,
        })
    }

    pub fn task_status(&self, task_id: &str) -> Result<String, SteplogError> {
        Ok(render(&self.task_status, task_id, "")?)
    }

    pub fn step(&self, task_id: &str, step: &str) -> Result<StepDestinations, SteplogError> {
        Ok(StepDestinations {
            logs: render(&self.step_logs, task_id, step)?,
            status: render(&self.step_status, task_id, step)?,
            log_size: render(&self.step_log_size, task_id, step)?,
            memory: render(&self.step_memory, task_id, step)?,
            cpu: render(&self.step_cpu, task_id, step)?,
            disk: render(&self.step_disk, task_id, step)?,
        })
    }
}

fn render(template: &str, task_id: &str, step: &str) -> Result<String> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("destination", template)
        .with_context(|| format!("Failed to parse destination template '{}'", template))?;
    tt.render("destination", &DestinationContext { task_id, step })
        .map_err(|e| anyhow!("Failed to render destination template '{}': {}", template, e))
}
