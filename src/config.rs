//! Configuration loading: a `KEY=VALUE` file with `#` comments, producing an
//! immutable [`Config`] record. A missing file is not an error — the
//! documented defaults apply.

use std::{fmt, fs, io, path::PathBuf};

/// Server configuration, loaded once at master startup and copied into every
/// forked worker. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub document_root: PathBuf,
    pub num_workers: u32,
    pub timeout_seconds: u64,
    pub cache_size_mb: u32,
    pub threads_per_worker: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            document_root: PathBuf::from("/var/www/html"),
            num_workers: 4,
            timeout_seconds: 30,
            cache_size_mb: 10,
            threads_per_worker: 10,
        }
    }
}

/// Startup-only error from [`load`]. A missing config file is not one of
/// these — it falls back to [`Config::default`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("line {line}: malformed entry {entry:?}")]
    MalformedLine { line: usize, entry: String },
    #[error("line {line}: {key} value {value:?} is not a valid {expected}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Loads configuration from `path`. If `path` does not exist, returns
/// [`Config::default`] without error; if it exists but cannot be read, or
/// contains a malformed line, returns [`ConfigError`].
pub fn load(path: &std::path::Path) -> Result<Config, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut config = Config::default();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::MalformedLine {
            line: line_no,
            entry: line.to_string(),
        })?;
        let key = key.trim();
        let value = value.trim();

        apply(&mut config, line_no, key, value)?;
    }

    Ok(config)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn apply(config: &mut Config, line_no: usize, key: &str, value: &str) -> Result<(), ConfigError> {
    fn parse<T: std::str::FromStr>(
        line: usize,
        key: &str,
        value: &str,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidValue {
            line,
            key: key.to_string(),
            value: value.to_string(),
            expected,
        })
    }

    match key {
        "PORT" => config.port = parse(line_no, key, value, "port number")?,
        "NUM_WORKERS" => config.num_workers = parse(line_no, key, value, "positive integer")?,
        "TIMEOUT_SECONDS" => config.timeout_seconds = parse(line_no, key, value, "positive integer")?,
        "CACHE_SIZE_MB" => config.cache_size_mb = parse(line_no, key, value, "non-negative integer")?,
        "THREADS_PER_WORKER" => {
            config.threads_per_worker = parse(line_no, key, value, "positive integer")?
        }
        "DOCUMENT_ROOT" => config.document_root = PathBuf::from(value),
        _ => tracing::debug!(key, line = line_no, "ignoring unknown config key"),
    }
    Ok(())
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port={} root={} workers={} timeout={}s cache={}MB threads={}",
            self.port,
            self.document_root.display(),
            self.num_workers,
            self.timeout_seconds,
            self.cache_size_mb,
            self.threads_per_worker
        )
    }
}
