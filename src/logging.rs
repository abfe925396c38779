//! tracing subscriber setup.
//!
//! Logs go to stderr (stdout is left for event output). With `log_dir` set, a
//! second plain-text copy is written to `<log_dir>/session_<local time>.log`.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Compact => fmt::layer().compact().with_target(false).with_writer(io::stderr).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
    }
}

/// ログファイルのパス（ディレクトリは作成する）
pub fn log_file_path(dir: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create log directory {}", dir))?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    Ok(PathBuf::from(dir).join(format!("session_{}.log", ts)))
}

/// グローバルな subscriber を設定する。ログファイルを開いた場合はそのパスを返す。
///
/// `RUST_LOG` があれば `level` より優先する。
pub fn init(config: &LoggingConfig) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let mut layers = vec![stderr_layer(config.format)];

    let path = match &config.log_dir {
        Some(dir) => {
            let path = log_file_path(dir)?;
            let file = fs::File::create(&path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            layers.push(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            );
            Some(path)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(path)
}
