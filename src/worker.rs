//! Per-process worker: accept loop, priority fast-path, admission control,
//! graceful shutdown.

use crate::{
    cache::Cache,
    config::Config,
    http::pipeline::{self, PEEK_CAP},
    pool::ThreadPool,
    queue::ConnectionQueue,
    stats::SharedStats,
};
use socket2::Socket;
use std::{
    net::TcpStream,
    os::fd::{FromRawFd, IntoRawFd},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Set by this worker's own signal handler; the accept loop polls it once
/// per iteration. Signal-safety requires the handler do no more than this.
static WORKER_STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_worker_termination_signal(_signum: libc::c_int) {
    WORKER_STOP.store(true, Ordering::SeqCst);
}

/// A single worker process's view of the server: its queue, cache, and
/// thread pool, all exclusively owned by this process.
pub struct Worker {
    config: Config,
    listener: Socket,
    stats: Arc<SharedStats>,
}

impl Worker {
    pub fn new(config: Config, listener: Socket, stats: Arc<SharedStats>) -> Self {
        Worker {
            config,
            listener,
            stats,
        }
    }

    /// Runs this worker's full lifecycle: install its own termination
    /// handler, allocate cache and queue, spawn the thread pool, accept
    /// connections until the stop flag is set, then shut down gracefully.
    pub fn run(self) {
        install_worker_signal_handlers();

        let cache = Cache::new(self.config.cache_size_mb).map(Arc::new);
        let queue = Arc::new(ConnectionQueue::new(crate::queue::DEFAULT_CAPACITY));
        let document_root = Arc::new(self.config.document_root.clone());
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let rejections = Arc::new(AtomicU64::new(0));

        let pool = ThreadPool::spawn(
            self.config.threads_per_worker,
            Arc::clone(&queue),
            cache.clone(),
            Arc::clone(&self.stats),
            Arc::clone(&document_root),
            timeout,
        );

        self.accept_loop(&queue, &rejections);

        queue.shutdown();
        pool.join();
        if let Some(cache) = &cache {
            let stats = cache.stats();
            tracing::info!(
                entries = stats.entries,
                total_size = stats.total_size,
                "worker shutting down, final cache statistics"
            );
        }
    }

    fn accept_loop(&self, queue: &Arc<ConnectionQueue>, rejections: &Arc<AtomicU64>) {
        while !WORKER_STOP.load(Ordering::SeqCst) {
            let (socket, _addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(err) if is_recoverable(&err) => continue,
                Err(_) => break,
            };

            let stream: TcpStream = unsafe { TcpStream::from_raw_fd(socket.into_raw_fd()) };

            if let Some(builtin) = self.peek_priority(&stream) {
                self.serve_priority(stream, builtin);
                continue;
            }

            if let Err(rejected) = queue.try_enqueue(stream) {
                self.reject(rejected, rejections);
            }
        }
    }

    /// Peeks up to [`PEEK_CAP`] bytes without consuming them; data peeked
    /// equals data subsequently received, so the handler thread still sees
    /// the full request line.
    fn peek_priority(&self, stream: &TcpStream) -> Option<pipeline::BuiltIn> {
        let mut buf = [std::mem::MaybeUninit::new(0u8); PEEK_CAP];
        let sock = socket2::SockRef::from(stream);
        let n = sock.peek(&mut buf).ok()?;
        let buf = unsafe { &*(&buf as *const _ as *const [u8; PEEK_CAP]) };
        pipeline::peek_builtin(&buf[..n])
    }

    fn serve_priority(&self, mut stream: TcpStream, _builtin: pipeline::BuiltIn) {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(self.config.timeout_seconds)));
        let _ = stream.set_write_timeout(Some(Duration::from_secs(self.config.timeout_seconds)));
        // Route through the ordinary pipeline on this accept thread —
        // bypassing the queue is the only special treatment priority
        // endpoints get.
        pipeline::handle_connection(stream, &self.config.document_root, None, &self.stats);
    }

    fn reject(&self, rejected: TcpStream, rejections: &Arc<AtomicU64>) {
        let err = crate::errors::ErrorKind::ServiceUnavailable;
        let rendered = err.render(crate::http::types::Version::Http11);
        let mut rejected = rejected;
        use std::io::Write;
        let _ = rejected.write_all(&rendered);

        let count = rejections.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            tracing::warn!(total_rejections = count, "queue full, rejecting connections");
        }
    }
}

fn install_worker_signal_handlers() {
    unsafe {
        install(libc::SIGINT, on_worker_termination_signal as usize);
        install(libc::SIGTERM, on_worker_termination_signal as usize);
    }
}

unsafe fn install(signum: libc::c_int, handler: usize) {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handler;
    libc::sigemptyset(&mut action.sa_mask);
    libc::sigaction(signum, &action, std::ptr::null_mut());
}

fn is_recoverable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
    )
}

/// Creates the listening socket with `SO_REUSEADDR` and, where available,
/// `SO_REUSEPORT`, backlog 128 — shared by every forked worker.
pub fn bind_listener(port: u16) -> std::io::Result<Socket> {
    let address: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&address.into())?;
    socket.listen(128)?;
    Ok(socket)
}
