//! `tracing`-based logging facade with a size-rotated file sink plus the
//! default diagnostic (stderr) stream.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;

/// Installs the global `tracing` subscriber: a compact stderr layer plus a
/// rotating file layer writing to `log_path`, combined via
/// `tracing_subscriber::registry` so every event reaches both — the file for
/// durable history, stderr for whoever is watching the process live.
pub fn init(log_path: &Path) -> io::Result<()> {
    let file_writer = RotatingWriter::open(log_path)?;

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
    let stderr_layer = fmt::layer().with_writer(io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

/// A `MakeWriter` that appends to a file and rotates it once it exceeds
/// [`ROTATE_AT_BYTES`], renaming to `<name>.<YYYYMMDD_HHMMSS>` and reopening.
#[derive(Clone)]
struct RotatingWriter {
    inner: std::sync::Arc<Mutex<RotatingInner>>,
}

struct RotatingInner {
    path: PathBuf,
    file: File,
    written: u64,
}

impl RotatingWriter {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(RotatingWriter {
            inner: std::sync::Arc::new(Mutex::new(RotatingInner {
                path: path.to_path_buf(),
                file,
                written,
            })),
        })
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.written >= ROTATE_AT_BYTES {
            inner.rotate()?;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).file.flush()
    }
}

impl RotatingInner {
    fn rotate(&mut self) -> io::Result<()> {
        let stamp = timestamp_now();
        let rotated = self.path.with_extension(format!(
            "{}.{stamp}",
            self.path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("log")
        ));
        fs::rename(&self.path, &rotated)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

/// `UTC` wall-clock timestamp formatted `YYYYMMDD_HHMMSS`, computed from
/// `SystemTime` without pulling in a date-time crate.
fn timestamp_now() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    civil_from_unix(secs)
}

fn civil_from_unix(unix_secs: u64) -> String {
    // Howard Hinnant's days_from_civil algorithm, inverted; avoids a
    // chrono/time dependency for a once-per-rotation timestamp.
    let days = (unix_secs / 86400) as i64;
    let rem = unix_secs % 86400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!("{year:04}{month:02}{day:02}_{hour:02}{minute:02}{second:02}")
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_epoch_formats() {
        assert_eq!(civil_from_unix(0), "19700101_000000");
        assert_eq!(civil_from_unix(1_700_000_000), "20231114_221320");
    }

    #[test]
    fn open_and_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let mut writer = RotatingWriter::open(&path).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
