use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging with tracing-subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to the provided level.
/// Human-readable output goes to stderr when `stderr` is set; when `log_dir` is
/// given, a plain copy is appended to `<log_dir>/<YYYY-MM-DD>.log`. Returns the
/// log file path in use.
pub fn init(log_level: &str, log_dir: Option<&Path>, stderr: bool) -> Option<PathBuf> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stderr_layer = stderr.then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    let (file, file_error) = match log_dir.map(open_daily_log) {
        Some(Ok((path, file))) => (Some((path, file)), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let mut path_in_use = None;
    let file_layer = file.map(|(path, file)| {
        path_in_use = Some(path);
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!(error = %e, "file logging disabled");
    }
    path_in_use
}

/// Open (appending) today's log file, creating the directory if needed.
fn open_daily_log(dir: &Path) -> std::io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = daily_log_path(dir, Local::now().date_naive());
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

fn daily_log_path(dir: &Path, day: chrono::NaiveDate) -> PathBuf {
    dir.join(format!("{}.log", day.format("%Y-%m-%d")))
}
