//! `server [config-path]` — prefork static-content HTTP/1.1 server.

use filehttpd::{errors::ServerError, master::Master};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "server.conf";
const LOG_PATH: &str = "filehttpd.log";

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if let Err(err) = run(&config_path) {
        eprintln!("filehttpd: {err}");
        std::process::exit(err.exit_code());
    }
}

fn run(config_path: &Path) -> Result<(), ServerError> {
    filehttpd::logging::init(Path::new(LOG_PATH)).map_err(ServerError::LoggerInit)?;

    let master = Master::start(config_path)?;
    master.supervise();
    master.shutdown();
    Ok(())
}
