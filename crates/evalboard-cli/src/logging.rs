//! Logging setup for the `evalboard` binary.
//!
//! Two outputs: a compact human-readable layer on stderr (stdout is reserved
//! for rendered results and headless JSON) and, when requested, JSON lines
//! appended to a file for post-hoc analysis with `jq`.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use evalboard_error::{EvalError, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// What [`init_logging`] installed.
#[derive(Debug)]
pub struct LogGuard {
    pub log_path: Option<PathBuf>,
}

#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileGuard {
            guard: self.file.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct SharedFileGuard<'a> {
    guard: MutexGuard<'a, File>,
}

impl io::Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.guard, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut *self.guard)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the default level, which is `info`, or `trace` with
/// `verbose`.
pub fn init_logging(verbose: bool, json_path: Option<&Path>) -> Result<LogGuard> {
    let default_level = if verbose { "trace" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let json_layer = match json_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::options().create(true).append(true).open(path)?;
            let writer = SharedFileWriter {
                file: Arc::new(Mutex::new(file)),
            };
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_names(true),
            )
        }
        None => None,
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(terminal_layer)
        .with(json_layer)
        .try_init()
        .map_err(|err| EvalError::internal(format!("logging already initialised: {err}")))?;

    Ok(LogGuard {
        log_path: json_path.map(Path::to_path_buf),
    })
}

/// Terminal-only logging for tests. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}
