//! Request-line parsing. Headers are never parsed — this server only needs
//! method, target and version to route a request.

use crate::{
    errors::ErrorKind,
    http::types::{Method, Version},
};

const MAX_METHOD: usize = 15;
const MAX_TARGET: usize = 511;
const MAX_VERSION: usize = 15;

/// A parsed request line, borrowing its target from the read buffer.
#[derive(Debug)]
pub(crate) struct Request<'a> {
    pub(crate) method: Method,
    pub(crate) target: &'a [u8],
    pub(crate) version: Version,
}

impl<'a> Request<'a> {
    /// Parses the request line out of `buf` (the bytes received from the
    /// socket). Fails with [`ErrorKind::BadRequest`] on anything malformed
    /// or oversized, per the 15/511/15-byte bounds on method/target/version.
    pub(crate) fn parse(buf: &'a [u8]) -> Result<Self, ErrorKind> {
        let line_end = memchr::memchr(b'\r', buf)
            .or_else(|| memchr::memchr(b'\n', buf))
            .ok_or(ErrorKind::BadRequest)?;
        let line = &buf[..line_end];

        let (method, method_len) = Method::from_bytes(line)?;
        if method_len > MAX_METHOD {
            return Err(ErrorKind::BadRequest);
        }
        let rest = &line[method_len + 1..];

        let space = memchr::memchr(b' ', rest).ok_or(ErrorKind::BadRequest)?;
        let target = &rest[..space];
        if target.is_empty() || target.len() > MAX_TARGET {
            return Err(ErrorKind::BadRequest);
        }

        let version_bytes = &rest[space + 1..];
        if version_bytes.len() > MAX_VERSION {
            return Err(ErrorKind::BadRequest);
        }
        let version = Version::from_bytes(version_bytes)?;

        Ok(Request {
            method,
            target,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let req = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.target, b"/");
        assert_eq!(req.version, Version::Http11);
    }

    #[test]
    fn parses_head_with_path() {
        let req = Request::parse(b"HEAD /health HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Head);
        assert_eq!(req.target, b"/health");
    }

    #[test]
    fn oversized_target_is_bad_request() {
        let mut line = b"GET /".to_vec();
        line.extend(std::iter::repeat(b'a').take(600));
        line.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        assert!(matches!(Request::parse(&line), Err(ErrorKind::BadRequest)));
    }

    #[test]
    fn missing_version_is_bad_request() {
        assert!(matches!(
            Request::parse(b"GET /\r\n\r\n"),
            Err(ErrorKind::BadRequest)
        ));
    }

    #[test]
    fn garbage_is_bad_request() {
        assert!(matches!(
            Request::parse(b"not a request\r\n"),
            Err(ErrorKind::BadRequest)
        ));
    }
}
