// src/logging.rs
//
// Log output for greenwave.
// - init_tracing: stderr subscriber, RUST_LOG or -v/-vv
// - DecisionSink: trait used by the control runner
// - NoopSink:     discards all decisions
// - JsonlSink:    one JSON object per decision, for offline analysis

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::DecisionRecord;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbosity` 0 is info, 1 is debug
/// and 2+ is trace. Calling this twice is harmless.
pub fn init_tracing(verbosity: u8) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(default_directive(verbosity)),
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Abstract sink for decision records.
pub trait DecisionSink {
    fn record_decision(&mut self, decision: &DecisionRecord);

    fn flush(&mut self) {}
}

impl<T: DecisionSink + ?Sized> DecisionSink for Box<T> {
    fn record_decision(&mut self, decision: &DecisionRecord) {
        (**self).record_decision(decision)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Sink that discards all decisions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DecisionSink for NoopSink {
    fn record_decision(&mut self, _decision: &DecisionRecord) {}
}

/// JSONL file sink.
///
/// Write failures are dropped; losing a record must not stop the run.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl DecisionSink for JsonlSink {
    fn record_decision(&mut self, decision: &DecisionRecord) {
        if serde_json::to_writer(&mut self.writer, decision).is_ok() {
            let _ = self.writer.write_all(b"\n");
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timings;

    fn decision(step: u64) -> DecisionRecord {
        DecisionRecord {
            intersection: "J".into(),
            step,
            action: 2,
            timings: Timings {
                primary_s: 30,
                secondary_s: 30,
            },
            policy: "random".into(),
        }
    }

    #[test]
    fn verbosity_maps_to_level() {
        assert_eq!(default_directive(0), "info");
        assert_eq!(default_directive(1), "debug");
        assert_eq!(default_directive(5), "trace");
    }

    #[test]
    fn jsonl_sink_writes_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        {
            let mut sink = JsonlSink::create(&path).unwrap();
            sink.record_decision(&decision(0));
            sink.record_decision(&decision(10));
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<DecisionRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows, vec![decision(0), decision(10)]);
    }
}
