//! Cross-process request statistics: a page of counters in anonymous shared
//! memory, guarded by a `pthread_mutex_t` created with
//! `PTHREAD_PROCESS_SHARED` (and `PTHREAD_MUTEX_ROBUST` where the platform
//! provides it, so a worker crashing mid-update cannot wedge its siblings).
//! Master and every forked worker map the same physical page.

use std::{
    io,
    mem::MaybeUninit,
    sync::atomic::{AtomicU64, Ordering},
};

/// Raw counters laid out for a shared memory page. `#[repr(C)]` so the
/// layout is identical across the processes that map it.
#[repr(C)]
struct Counters {
    total_requests: AtomicU64,
    bytes_sent: AtomicU64,
    status_200: AtomicU64,
    status_404: AtomicU64,
    status_5xx: AtomicU64,
    active_connections: AtomicU64,
    response_time_total_ms: AtomicU64,
    response_time_count: AtomicU64,
}

#[repr(C)]
struct Page {
    mutex: libc::pthread_mutex_t,
    counters: Counters,
}

/// Point-in-time copy of all counters, taken under the cross-process mutex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub bytes_sent: u64,
    pub status_200: u64,
    pub status_404: u64,
    pub status_5xx: u64,
    pub active_connections: u64,
    pub response_time_total_ms: u64,
    pub response_time_count: u64,
}

/// A handle to the shared statistics page. Cloning is cheap — every clone
/// points at the same mapping; the mapping itself is torn down once by
/// [`SharedStats::cleanup`], called by the master alone.
pub struct SharedStats {
    page: *mut Page,
    len: usize,
}

// The page is explicitly designed for concurrent cross-process access: every
// field access outside of `page` itself goes through the embedded mutex or
// is already atomic.
unsafe impl Send for SharedStats {}
unsafe impl Sync for SharedStats {}

impl SharedStats {
    /// Allocates a process-shared anonymous page and initializes the
    /// embedded mutex in cross-process mode. Call once, before forking.
    pub fn init() -> io::Result<Self> {
        let len = std::mem::size_of::<Page>();
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let page = ptr as *mut Page;

        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            libc::pthread_mutexattr_init(attr.as_mut_ptr());
            libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
            #[cfg(target_os = "linux")]
            libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST);
            libc::pthread_mutex_init(&mut (*page).mutex, attr.as_ptr());
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());

            (*page).counters.total_requests = AtomicU64::new(0);
            (*page).counters.bytes_sent = AtomicU64::new(0);
            (*page).counters.status_200 = AtomicU64::new(0);
            (*page).counters.status_404 = AtomicU64::new(0);
            (*page).counters.status_5xx = AtomicU64::new(0);
            (*page).counters.active_connections = AtomicU64::new(0);
            (*page).counters.response_time_total_ms = AtomicU64::new(0);
            (*page).counters.response_time_count = AtomicU64::new(0);
        }

        Ok(SharedStats { page, len })
    }

    /// Destroys the mutex and releases the page. Master-only, called after
    /// every worker has exited.
    pub fn cleanup(&self) {
        unsafe {
            libc::pthread_mutex_destroy(&mut (*self.page).mutex);
            libc::munmap(self.page as *mut libc::c_void, self.len);
        }
    }

    fn with_lock<T>(&self, f: impl FnOnce(&Counters) -> T) -> T {
        unsafe {
            #[allow(unused_variables)]
            let rc = libc::pthread_mutex_lock(&mut (*self.page).mutex);
            // EOWNERDEAD: the previous holder died without unlocking; the
            // mutex is now ours but marked inconsistent. We hold no
            // non-atomic invariants across the critical section, so mark it
            // consistent and proceed. Only raised on platforms where the
            // mutex was created robust (see `init`).
            #[cfg(target_os = "linux")]
            if rc == libc::EOWNERDEAD {
                libc::pthread_mutex_consistent(&mut (*self.page).mutex);
            }
            let result = f(&(*self.page).counters);
            libc::pthread_mutex_unlock(&mut (*self.page).mutex);
            result
        }
    }

    /// Increments `total_requests`, `bytes_sent`, and the bucket matching
    /// `status` (200, 404, or 5xx). Every 15th update logs a summary line.
    pub fn update(&self, bytes: u64, status: u16) {
        let total = self.with_lock(|c| {
            c.total_requests.fetch_add(1, Ordering::Relaxed);
            c.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
            match status {
                200 => {
                    c.status_200.fetch_add(1, Ordering::Relaxed);
                }
                404 => {
                    c.status_404.fetch_add(1, Ordering::Relaxed);
                }
                s if s >= 500 => {
                    c.status_5xx.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
            c.total_requests.load(Ordering::Relaxed)
        });
        if total % 15 == 0 {
            tracing::info!(total_requests = total, "stats checkpoint");
        }
    }

    pub fn inc_active(&self) {
        self.with_lock(|c| {
            c.active_connections.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// No-op if the gauge is already zero (defensive floor).
    pub fn dec_active(&self) {
        self.with_lock(|c| {
            let _ = c
                .active_connections
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    (v > 0).then(|| v - 1)
                });
        });
    }

    pub fn add_response_time(&self, ms: u64) {
        self.with_lock(|c| {
            c.response_time_total_ms.fetch_add(ms, Ordering::Relaxed);
            c.response_time_count.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Copies all counters under the mutex.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.with_lock(|c| StatsSnapshot {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            status_200: c.status_200.load(Ordering::Relaxed),
            status_404: c.status_404.load(Ordering::Relaxed),
            status_5xx: c.status_5xx.load(Ordering::Relaxed),
            active_connections: c.active_connections.load(Ordering::Relaxed),
            response_time_total_ms: c.response_time_total_ms.load(Ordering::Relaxed),
            response_time_count: c.response_time_count.load(Ordering::Relaxed),
        })
    }
}

impl StatsSnapshot {
    /// Renders the `/health` and `/stats` JSON body.
    pub fn to_json(&self) -> String {
        format!(
            "{{\"total_requests\":{},\"bytes_sent\":{},\"status_200\":{},\
             \"status_404\":{},\"status_5xx\":{},\"active_connections\":{},\
             \"avg_response_time_ms\":{:.3}}}",
            self.total_requests,
            self.bytes_sent,
            self.status_200,
            self.status_404,
            self.status_5xx,
            self.active_connections,
            self.avg_response_time_ms()
        )
    }

    /// Renders the `/metrics` Prometheus-style exposition body.
    pub fn to_prometheus(&self) -> String {
        format!(
            "# TYPE filehttpd_requests_total counter\n\
             filehttpd_requests_total {}\n\
             # TYPE filehttpd_bytes_sent_total counter\n\
             filehttpd_bytes_sent_total {}\n\
             # TYPE filehttpd_responses_total counter\n\
             filehttpd_responses_total{{status=\"200\"}} {}\n\
             filehttpd_responses_total{{status=\"404\"}} {}\n\
             filehttpd_responses_total{{status=\"5xx\"}} {}\n\
             # TYPE filehttpd_active_connections gauge\n\
             filehttpd_active_connections {}\n\
             # TYPE filehttpd_response_time_ms_avg gauge\n\
             filehttpd_response_time_ms_avg {:.3}\n",
            self.total_requests,
            self.bytes_sent,
            self.status_200,
            self.status_404,
            self.status_5xx,
            self.active_connections,
            self.avg_response_time_ms()
        )
    }

    fn avg_response_time_ms(&self) -> f64 {
        if self.response_time_count == 0 {
            0.0
        } else {
            self.response_time_total_ms as f64 / self.response_time_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_increments_counters_monotonically() {
        let stats = SharedStats::init().unwrap();
        stats.update(100, 200);
        stats.update(50, 404);
        stats.update(10, 500);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.bytes_sent, 160);
        assert_eq!(snap.status_200, 1);
        assert_eq!(snap.status_404, 1);
        assert_eq!(snap.status_5xx, 1);
        stats.cleanup();
    }

    #[test]
    fn active_connection_balance() {
        let stats = SharedStats::init().unwrap();
        stats.inc_active();
        stats.inc_active();
        stats.dec_active();
        assert_eq!(stats.snapshot().active_connections, 1);
        stats.dec_active();
        stats.dec_active(); // defensive floor: no-op below zero
        assert_eq!(stats.snapshot().active_connections, 0);
        stats.cleanup();
    }

    #[test]
    fn response_time_accumulates() {
        let stats = SharedStats::init().unwrap();
        stats.add_response_time(5);
        stats.add_response_time(15);
        let snap = stats.snapshot();
        assert_eq!(snap.response_time_total_ms, 20);
        assert_eq!(snap.response_time_count, 2);
        stats.cleanup();
    }

    #[test]
    fn json_and_prometheus_render_without_panicking() {
        let stats = SharedStats::init().unwrap();
        stats.update(10, 200);
        let snap = stats.snapshot();
        assert!(snap.to_json().contains("\"total_requests\":1"));
        assert!(snap.to_prometheus().contains("filehttpd_requests_total 1"));
        stats.cleanup();
    }
}
