//! The HTTP/1.1 request/response pipeline: one connection, one request, one
//! response, then close.

use crate::{
    cache::{Cache, MAX_FILE_SIZE},
    errors::ErrorKind,
    http::{
        request::Request,
        response::{render_headers, CacheMark},
        types::{Method, StatusCode, Version},
    },
    mime,
    stats::SharedStats,
};
use std::{
    fs::File,
    io::{ErrorKind as IoErrorKind, Read, Write},
    net::TcpStream,
    path::Path,
    sync::Arc,
    time::Instant,
};

const READ_BUFFER: usize = 8192;
const PEEK_BUFFER: usize = 511;

/// The three built-in observability endpoints, matched with or without a
/// trailing slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuiltIn {
    Health,
    Metrics,
    Stats,
}

impl BuiltIn {
    fn from_target(target: &[u8]) -> Option<Self> {
        match strip_trailing_slash(target) {
            b"/health" => Some(BuiltIn::Health),
            b"/metrics" => Some(BuiltIn::Metrics),
            b"/stats" => Some(BuiltIn::Stats),
            _ => None,
        }
    }
}

fn strip_trailing_slash(target: &[u8]) -> &[u8] {
    if target.len() > 1 && target.ends_with(b"/") {
        &target[..target.len() - 1]
    } else {
        target
    }
}

/// Returns `Some(builtin)` if the first bytes received on a freshly accepted
/// socket name one of the observability endpoints, used by the worker's
/// priority fast-path peek (checked without consuming the data).
pub fn peek_builtin(peeked: &[u8]) -> Option<BuiltIn> {
    let line_end = memchr::memchr(b'\r', peeked).or_else(|| memchr::memchr(b'\n', peeked))?;
    let line = &peeked[..line_end];
    let (method, method_len) = Method::from_bytes(line).ok()?;
    if !matches!(method, Method::Get | Method::Head) {
        return None;
    }
    let rest = &line[method_len + 1..];
    let space = memchr::memchr(b' ', rest)?;
    BuiltIn::from_target(&rest[..space])
}

pub const PEEK_CAP: usize = PEEK_BUFFER;

/// Serves one accepted connection end to end: receive, parse, route, serve,
/// record stats, close. Never panics out to the caller — every failure path
/// is converted to an HTTP status.
pub fn handle_connection(
    mut stream: TcpStream,
    document_root: &Path,
    cache: Option<&Cache>,
    stats: &SharedStats,
) {
    stats.inc_active();
    let start = Instant::now();
    let status = serve(&mut stream, document_root, cache, stats);
    stats.add_response_time(start.elapsed().as_millis() as u64);
    stats.dec_active();
    let _ = status;
}

fn serve(
    stream: &mut TcpStream,
    document_root: &Path,
    cache: Option<&Cache>,
    stats: &SharedStats,
) -> u16 {
    let mut buf = [0u8; READ_BUFFER];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return 0,
        Ok(n) => n,
    };

    let request = match Request::parse(&buf[..n]) {
        Ok(req) => req,
        Err(err) => return respond_error(stream, Version::Http11, &err, stats),
    };

    if !matches!(request.method, Method::Get | Method::Head) {
        let err = ErrorKind::NotImplemented;
        return respond_error(stream, request.version, &err, stats);
    }

    let head_only = request.method == Method::Head;

    if let Some(builtin) = BuiltIn::from_target(request.target) {
        return serve_builtin(stream, request.version, builtin, head_only, stats);
    }

    let relative = match resolve_relative_path(request.target) {
        Ok(rel) => rel,
        Err(err) => return respond_error(stream, request.version, &err, stats),
    };

    let full_path = document_root.join(relative);
    serve_file(stream, request.version, &full_path, head_only, cache, stats)
}

/// Computes the relative filesystem path for a non-built-in target: `/`
/// maps to `/index.html`; otherwise the target with any query string
/// stripped. Any `..` substring in the result is rejected outright.
fn resolve_relative_path(target: &[u8]) -> Result<&str, ErrorKind> {
    if !target.starts_with(b"/") {
        return Err(ErrorKind::BadRequest);
    }
    let without_query = match memchr::memchr(b'?', target) {
        Some(idx) => &target[..idx],
        None => target,
    };
    let relative = if without_query == b"/" {
        "index.html"
    } else {
        simdutf8::basic::from_utf8(&without_query[1..]).map_err(|_| ErrorKind::BadRequest)?
    };
    if relative.contains("..") {
        return Err(ErrorKind::Forbidden);
    }
    Ok(relative)
}

fn serve_builtin(
    stream: &mut TcpStream,
    version: Version,
    builtin: BuiltIn,
    head_only: bool,
    stats: &SharedStats,
) -> u16 {
    let snapshot = stats.snapshot();
    let (content_type, body) = match builtin {
        BuiltIn::Health | BuiltIn::Stats => ("application/json", snapshot.to_json()),
        BuiltIn::Metrics => ("text/plain; version=0.0.4", snapshot.to_prometheus()),
    };
    write_response(
        stream,
        version,
        StatusCode::Ok,
        content_type,
        body.as_bytes(),
        head_only,
        CacheMark::None,
        stats,
    );
    200
}

fn serve_file(
    stream: &mut TcpStream,
    version: Version,
    full_path: &Path,
    head_only: bool,
    cache: Option<&Cache>,
    stats: &SharedStats,
) -> u16 {
    let path_key = full_path.to_string_lossy();
    let content_type = mime::lookup(&path_key);

    if let Some(cache) = cache {
        if let Some(body) = cache.get(&path_key) {
            write_response(
                stream,
                version,
                StatusCode::Ok,
                content_type,
                &body,
                head_only,
                CacheMark::Hit,
                stats,
            );
            return 200;
        }
    }

    let mut file = match File::open(full_path) {
        Ok(file) => file,
        Err(_) => {
            let err = ErrorKind::NotFound;
            return respond_error(stream, version, &err, stats);
        }
    };

    let metadata = match file.metadata() {
        Ok(metadata) => metadata,
        Err(_) => {
            let err = ErrorKind::InternalServerError;
            return respond_error(stream, version, &err, stats);
        }
    };
    if metadata.is_dir() {
        let err = ErrorKind::Forbidden;
        return respond_error(stream, version, &err, stats);
    }

    let size = metadata.len() as usize;
    let cacheable = cache.is_some() && size > 0 && size < MAX_FILE_SIZE;

    if cacheable {
        let mut buf = Vec::with_capacity(size);
        if file.read_to_end(&mut buf).is_ok() && buf.len() == size {
            let body: Arc<[u8]> = Arc::from(buf.into_boxed_slice());
            if let Some(cache) = cache {
                cache.put(&path_key, Arc::clone(&body));
            }
            write_response(
                stream,
                version,
                StatusCode::Ok,
                content_type,
                &body,
                head_only,
                CacheMark::Miss,
                stats,
            );
            return 200;
        }
        // Read-short or allocation failure: fall through to the streaming
        // path against a freshly reopened file.
        let reopened = File::open(full_path);
        if let Ok(file) = reopened {
            return stream_whole_file(
                stream,
                version,
                file,
                size,
                content_type,
                head_only,
                CacheMark::Miss,
                stats,
            );
        }
        let err = ErrorKind::InternalServerError;
        return respond_error(stream, version, &err, stats);
    }

    let cache_mark = if cache.is_some() { CacheMark::Miss } else { CacheMark::None };
    stream_whole_file(stream, version, file, size, content_type, head_only, cache_mark, stats)
}

fn stream_whole_file(
    stream: &mut TcpStream,
    version: Version,
    mut file: File,
    size: usize,
    content_type: &str,
    head_only: bool,
    cache_mark: CacheMark,
    stats: &SharedStats,
) -> u16 {
    let headers = render_headers(version, StatusCode::Ok, content_type, size, cache_mark);
    if stream.write_all(&headers).is_err() {
        return 0;
    }
    if head_only {
        stats.update(0, 200);
        return 200;
    }
    if stream_file(stream, &mut file, size).is_err() {
        return 0;
    }
    stats.update(size as u64, 200);
    200
}

/// Streams `file` to `stream` via a zero-copy system facility where
/// available (Linux `sendfile`), falling back to a buffered copy loop
/// elsewhere. Loops on partial sends and retries on `EINTR`.
#[cfg(target_os = "linux")]
fn stream_file(stream: &mut TcpStream, file: &mut File, size: usize) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let out_fd = stream.as_raw_fd();
    let in_fd = file.as_raw_fd();
    let mut remaining = size as libc::off_t;
    let mut offset: libc::off_t = 0;

    while remaining > 0 {
        let sent = unsafe { libc::sendfile(out_fd, in_fd, &mut offset, remaining as usize) };
        if sent < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == IoErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if sent == 0 {
            break;
        }
        remaining -= sent as libc::off_t;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn stream_file(stream: &mut TcpStream, file: &mut File, size: usize) -> std::io::Result<()> {
    let mut remaining = size;
    let mut buf = [0u8; READ_BUFFER];
    while remaining > 0 {
        let to_read = remaining.min(buf.len());
        match file.read(&mut buf[..to_read]) {
            Ok(0) => break,
            Ok(n) => {
                stream.write_all(&buf[..n])?;
                remaining -= n;
            }
            Err(ref e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn write_response(
    stream: &mut TcpStream,
    version: Version,
    status: StatusCode,
    content_type: &str,
    body: &[u8],
    head_only: bool,
    cache_mark: CacheMark,
    stats: &SharedStats,
) {
    let headers = render_headers(version, status, content_type, body.len(), cache_mark);
    if stream.write_all(&headers).is_err() {
        return;
    }
    if !head_only && stream.write_all(body).is_err() {
        return;
    }
    stats.update(if head_only { 0 } else { body.len() as u64 }, status.code());
}

fn respond_error(stream: &mut TcpStream, version: Version, err: &ErrorKind, stats: &SharedStats) -> u16 {
    let rendered = err.render(version);
    let _ = stream.write_all(&rendered);
    stats.update(0, err.status_code());
    err.status_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_matches_with_and_without_trailing_slash() {
        assert_eq!(BuiltIn::from_target(b"/health"), Some(BuiltIn::Health));
        assert_eq!(BuiltIn::from_target(b"/health/"), Some(BuiltIn::Health));
        assert_eq!(BuiltIn::from_target(b"/metrics"), Some(BuiltIn::Metrics));
        assert_eq!(BuiltIn::from_target(b"/stats"), Some(BuiltIn::Stats));
        assert_eq!(BuiltIn::from_target(b"/other"), None);
    }

    #[test]
    fn root_maps_to_index_html() {
        assert_eq!(resolve_relative_path(b"/").unwrap(), "index.html");
    }

    #[test]
    fn query_string_is_stripped() {
        assert_eq!(
            resolve_relative_path(b"/a/b.html?x=1&y=2").unwrap(),
            "a/b.html"
        );
    }

    #[test]
    fn traversal_substring_is_forbidden() {
        assert_eq!(resolve_relative_path(b"/../etc/passwd"), Err(ErrorKind::Forbidden));
        assert_eq!(resolve_relative_path(b"/a..b"), Err(ErrorKind::Forbidden));
    }

    #[test]
    fn peek_detects_observability_prefixes() {
        assert_eq!(peek_builtin(b"GET /metrics HTTP/1.1\r\n"), Some(BuiltIn::Metrics));
        assert_eq!(peek_builtin(b"HEAD /health HTTP/1.1\r\n"), Some(BuiltIn::Health));
        assert_eq!(peek_builtin(b"GET /index.html HTTP/1.1\r\n"), None);
    }

    /// Drives `handle_connection` over a real loopback socket pair so the
    /// end-to-end scenarios can be asserted against actual bytes on the
    /// wire rather than internal return values.
    fn round_trip(root: &std::path::Path, request: &[u8]) -> String {
        use std::{io::Read as _, net::TcpListener};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        client.write_all(request).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let stats = SharedStats::init().unwrap();
        let root = root.to_path_buf();
        handle_connection(server, &root, None, &stats);
        stats.cleanup();

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn scenario_get_root_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hi").unwrap();
        let response = round_trip(dir.path(), b"GET / HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("content-length: 2\r\n"));
        assert!(response.ends_with("hi"));
    }

    #[test]
    fn scenario_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let response = round_trip(dir.path(), b"GET /missing HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.ends_with("<h1>404 Not Found</h1>"));
    }

    #[test]
    fn scenario_traversal_is_403_and_never_opens_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let response = round_trip(dir.path(), b"GET /../etc/passwd HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[test]
    fn scenario_post_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let response = round_trip(dir.path(), b"POST / HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    }

    #[test]
    fn scenario_head_omits_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hi").unwrap();
        let response = round_trip(dir.path(), b"HEAD / HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("connection: close\r\n\r\n"));
    }

    #[test]
    fn scenario_health_endpoint_returns_json() {
        let dir = tempfile::tempdir().unwrap();
        let response = round_trip(dir.path(), b"GET /health HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("\"total_requests\""));
    }
}
