//! The master process: load configuration, install signal handlers, create
//! the listening socket, fork N workers, supervise, and terminate them on
//! shutdown.

use crate::{
    config::{self, Config},
    errors::ServerError,
    stats::SharedStats,
    worker::{self, Worker},
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_termination_signal(_signum: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

extern "C" fn ignore_signal(_signum: libc::c_int) {}

/// The running server: configuration, shared statistics, and the forked
/// worker process IDs.
pub struct Master {
    config: Config,
    stats: Arc<SharedStats>,
    worker_pids: Vec<libc::pid_t>,
}

impl Master {
    /// Loads configuration, installs signal handlers, initializes shared
    /// statistics, binds the listening socket, and forks `config.num_workers`
    /// worker processes. Returns once every worker is running.
    pub fn start(config_path: &Path) -> Result<Self, ServerError> {
        let config = config::load(config_path)?;
        tracing::info!(%config, "starting");

        install_signal_handlers();

        let stats = Arc::new(SharedStats::init().map_err(ServerError::StatsInit)?);

        let listener = worker::bind_listener(config.port).map_err(ServerError::Bind)?;

        let mut worker_pids = Vec::with_capacity(config.num_workers as usize);
        for id in 0..config.num_workers {
            let listener = listener.try_clone().map_err(ServerError::Bind)?;
            let stats = Arc::clone(&stats);
            let config = config.clone();

            match unsafe { libc::fork() } {
                -1 => return Err(ServerError::Bind(std::io::Error::last_os_error())),
                0 => {
                    // Child: run the worker loop and exit — never return to
                    // the caller of `start`.
                    let worker = Worker::new(config, listener, stats);
                    worker.run();
                    std::process::exit(0);
                }
                pid => {
                    tracing::info!(worker_id = id, pid, "spawned worker");
                    worker_pids.push(pid);
                }
            }
        }

        Ok(Master {
            config,
            stats,
            worker_pids,
        })
    }

    /// Sleeps in 1-second ticks, emitting an aggregated stats snapshot every
    /// 30 ticks and reaping exited children non-blockingly, until the stop
    /// flag is set by a signal handler.
    pub fn supervise(&self) {
        let mut tick = 0u64;
        while !STOP.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(1));
            tick += 1;
            self.reap_exited_children();
            if tick % 30 == 0 {
                let snapshot = self.stats.snapshot();
                tracing::info!(?snapshot, "periodic stats");
            }
        }
    }

    fn reap_exited_children(&self) {
        loop {
            let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
            if pid <= 0 {
                break;
            }
            tracing::warn!(pid, "worker exited, no automatic respawn");
        }
    }

    /// Sends the termination signal to every worker, waits for each, closes
    /// the listening socket (implicitly, by dropping it), and tears down
    /// shared statistics.
    pub fn shutdown(self) {
        for &pid in &self.worker_pids {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        for &pid in &self.worker_pids {
            unsafe {
                libc::waitpid(pid, std::ptr::null_mut(), 0);
            }
        }
        self.stats.cleanup();
        tracing::info!("shutdown complete");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn install_signal_handlers() {
    unsafe {
        install(libc::SIGINT, on_termination_signal as usize);
        install(libc::SIGTERM, on_termination_signal as usize);
        install(libc::SIGCHLD, ignore_signal as usize);
    }
}

unsafe fn install(signum: libc::c_int, handler: usize) {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handler;
    libc::sigemptyset(&mut action.sa_mask);
    libc::sigaction(signum, &action, std::ptr::null_mut());
}
