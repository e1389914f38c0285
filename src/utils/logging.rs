//! # Metrics Logging
//!
//! [`MetricsLogger`] is a training callback that appends one JSON object per
//! outer iteration to a `.jsonl` file, plus a final `{"status": ...}` line.

use crate::config::TrainConfig;
use crate::matrix::Dictionary;
use crate::optim::{Callback, CallbackSignal, IterationRecord, TrainStatus};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct MetricsLogger {
    out: BufWriter<File>,
}

#[derive(Serialize)]
struct StatusLine {
    status: TrainStatus,
}

impl MetricsLogger {
    /// Opens `path` for appending, creating parent directories as needed.
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(MetricsLogger {
            out: BufWriter::new(file),
        })
    }

    pub fn log<T: Serialize>(&mut self, metrics: &T) {
        let written = serde_json::to_string(metrics)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.out, "{}", line));
        if let Err(err) = written {
            log::warn!("failed to write metrics line: {}", err);
        }
    }
}

impl Callback for MetricsLogger {
    fn on_train_begin(&mut self, config: &TrainConfig) {
        self.log(config);
    }

    fn on_iteration_end(&mut self, record: &IterationRecord, _dictionary: &Dictionary) -> CallbackSignal {
        self.log(record);
        CallbackSignal::Continue
    }

    fn on_train_end(&mut self, status: TrainStatus) {
        self.log(&StatusLine { status });
        if let Err(err) = self.out.flush() {
            log::warn!("failed to flush metrics file: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: usize) -> IterationRecord {
        IterationRecord {
            iteration,
            objective: 1.5,
            reconstruction: 1.0,
            penalty: 0.5,
            relative_improvement: None,
            sparsity: 0.75,
            displacement: 0.01,
            code_passes: 4,
            mean_code_passes: 2.5,
            stalled_patches: 0,
            dict_passes: 2,
            dict_converged: true,
            dict_movement: 1e-7,
            reseeded_atoms: vec![3],
            stall_streak: 0,
        }
    }

    #[test]
    fn writes_one_json_object_per_line() {
        let path = std::env::temp_dir()
            .join(format!("sparsedict-metrics-{}", std::process::id()))
            .join("run.jsonl");
        let dict = Dictionary::random(2, 2, 0).unwrap();
        {
            let mut logger = MetricsLogger::new(&path).unwrap();
            logger.on_train_begin(&TrainConfig::default());
            logger.on_iteration_end(&record(1), &dict);
            logger.on_iteration_end(&record(2), &dict);
            logger.on_train_end(TrainStatus::MaxIterReached);
        }
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();

        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["lambda"], 0.1);
        assert_eq!(lines[2]["iteration"], 2);
        assert_eq!(lines[2]["reseeded_atoms"][0], 3);
        assert_eq!(lines[2]["mean_code_passes"], 2.5);
        assert!(lines[1]["relative_improvement"].is_null());
        assert_eq!(lines[3]["status"], "max_iter_reached");
    }
}
