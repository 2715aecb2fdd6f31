use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use gpu_metrics::{Metrics, exposition};
use tracing::{debug, trace};

use crate::errors::SinkError;

pub type Result<T> = std::result::Result<T, SinkError>;

/// Destination for every collected snapshot
pub trait MetricsSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn publish(&mut self, metrics: &Metrics) -> Result<()>;
}

/// Prometheus textfile, in the format read by the node exporter
/// textfile collector.
///
/// The rendering is written next to the target and then renamed over it, so a
/// reader never observes a partially written file.
#[derive(Debug, Clone)]
pub struct TextfileSink {
    path: PathBuf,
    namespace: String,
}

impl TextfileSink {
    pub fn new(path: &Path, namespace: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            namespace: namespace.to_string(),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        file_name.push(".tmp");

        self.path.with_file_name(file_name)
    }
}

impl MetricsSink for TextfileSink {
    fn name(&self) -> &'static str {
        "textfile"
    }

    fn publish(&mut self, metrics: &Metrics) -> Result<()> {
        let text = exposition::render_prometheus(metrics, &self.namespace)
            .map_err(|error| SinkError::Render {
                sink: self.name(),
                error,
            })?;

        let staging = self.staging_path();
        let write_error = |error| SinkError::Write {
            path: self.path.clone(),
            error,
        };

        fs::write(&staging, text).map_err(write_error)?;
        fs::rename(&staging, &self.path).map_err(write_error)?;

        trace!("Textfile sink: wrote {:?}", self.path);

        Ok(())
    }
}

/// Log a short summary of every snapshot at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn publish(&mut self, metrics: &Metrics) -> Result<()> {
        debug!(
            "Collected {} GPU(s), driver version {}",
            metrics.devices().len(),
            metrics.version()
        );

        for device in metrics.devices() {
            debug!(
                "GPU {} ({}): {}°C, {} mW (avg {:.1} mW), fan {}%, \
                 memory {}/{} bytes, utilization {}% (avg {:.1}%)",
                device.index,
                device.name,
                device.temperature,
                device.power_usage,
                device.power_usage_average,
                device.fan_speed,
                device.memory_used,
                device.memory_total,
                device.utilization_gpu,
                device.utilization_gpu_average,
            );
        }

        Ok(())
    }
}
