//! Process-wide logger setup: one log file per day under the configured log
//! directory, plus a human-readable stderr layer. The subscriber is the only
//! permitted piece of global mutable state in the process.

use crate::config::LoggingConfig;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

struct DailyFileWriter {
    dir: std::path::PathBuf,
    file: Mutex<Option<(String, std::fs::File)>>,
}

impl DailyFileWriter {
    fn new(dir: std::path::PathBuf) -> Self {
        Self {
            dir,
            file: Mutex::new(None),
        }
    }

    fn current_file(&self) -> io::Result<std::fs::File> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let mut guard = self.file.lock().expect("log file lock poisoned");

        if let Some((date, file)) = guard.as_ref() {
            if date == &today {
                return file.try_clone();
            }
        }

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("ztictl-{today}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let cloned = file.try_clone()?;
        *guard = Some((today, file));
        Ok(cloned)
    }
}

impl<'a> MakeWriter<'a> for DailyFileWriter {
    type Writer = std::fs::File;

    fn make_writer(&'a self) -> Self::Writer {
        self.current_file().unwrap_or_else(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join("ztictl-fallback.log"))
                .expect("fallback log file must be writable")
        })
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter (`info`). Returns an error only if the subscriber was already set
/// by this process (callers should install it exactly once, in `main`).
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(io::stderr),
    );

    if config.enabled {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(DailyFileWriter::new(config.dir.clone()));
        registry.with(file_layer).try_init()
    } else {
        registry.try_init()
    }
}

use tracing_subscriber::layer::SubscriberExt;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn daily_file_writer_creates_dated_log_file() {
        let dir = TempDir::new().unwrap();
        let writer = DailyFileWriter::new(dir.path().to_path_buf());
        let _ = writer.current_file().unwrap();
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        assert!(dir.path().join(format!("ztictl-{today}.log")).exists());
    }

    #[test]
    fn daily_file_writer_reuses_handle_for_same_day() {
        let dir = TempDir::new().unwrap();
        let writer = DailyFileWriter::new(dir.path().to_path_buf());
        let _ = writer.current_file().unwrap();
        let _ = writer.current_file().unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
