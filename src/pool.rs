//! Fixed-size per-worker thread pool draining a [`ConnectionQueue`].

use crate::{
    cache::Cache,
    http::pipeline,
    queue::{ConnectionQueue, Dequeued},
    stats::SharedStats,
};
use std::{
    net::TcpStream,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// A pool of `T` handler threads, each looping dequeue → handle → repeat
/// until the queue signals shutdown.
pub struct ThreadPool {
    handles: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl ThreadPool {
    /// Spawns `threads` handler threads against `queue`, serving requests
    /// from `document_root` through `cache` (if any) and recording
    /// observations in `stats`. `timeout` bounds per-connection socket I/O.
    pub fn spawn(
        threads: u32,
        queue: Arc<ConnectionQueue>,
        cache: Option<Arc<Cache>>,
        stats: Arc<SharedStats>,
        document_root: Arc<std::path::PathBuf>,
        timeout: Duration,
    ) -> Self {
        let active = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(threads as usize);

        for id in 0..threads {
            let queue = Arc::clone(&queue);
            let cache = cache.clone();
            let stats = Arc::clone(&stats);
            let document_root = Arc::clone(&document_root);
            let active = Arc::clone(&active);

            let handle = thread::Builder::new()
                .name(format!("filehttpd-worker-{id}"))
                .spawn(move || {
                    active.fetch_add(1, Ordering::SeqCst);
                    loop {
                        match queue.dequeue() {
                            Dequeued::Stream(stream) => {
                                apply_timeouts(&stream, timeout);
                                pipeline::handle_connection(
                                    stream,
                                    &document_root,
                                    cache.as_deref(),
                                    &stats,
                                );
                            }
                            Dequeued::Shutdown => break,
                        }
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .expect("failed to spawn handler thread");
            handles.push(handle);
        }

        ThreadPool { handles, active }
    }

    /// Number of handler threads currently alive.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Joins every handler thread. Call after [`ConnectionQueue::shutdown`]
    /// so threads observe the shutdown signal and exit their loop.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn apply_timeouts(stream: &TcpStream, timeout: Duration) {
    let _ = stream.set_read_timeout(Some(timeout));
    let _ = stream.set_write_timeout(Some(timeout));
}
