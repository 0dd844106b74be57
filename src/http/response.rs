//! Response header rendering. Every response here declares
//! `Connection: close`, so there is no keep-alive state to track.

use crate::http::types::{StatusCode, Version};

/// Cache lookup outcome for the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheMark {
    Hit,
    Miss,
    None,
}

/// Renders the response header block described by the pipeline's response
/// format: status line, `Content-Type`, `Content-Length`, `Server`, optional
/// `X-Cache`, `Connection: close`, blank line.
pub(crate) fn render_headers(
    version: Version,
    status: StatusCode,
    content_type: &str,
    content_length: usize,
    cache_mark: CacheMark,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(160);
    out.extend_from_slice(version.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.code().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.reason().as_bytes());
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(b"content-type: ");
    out.extend_from_slice(content_type.as_bytes());
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(b"content-length: ");
    out.extend_from_slice(content_length.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(b"server: TemplateHTTP/1.0\r\n");

    match cache_mark {
        CacheMark::Hit => out.extend_from_slice(b"x-cache: HIT\r\n"),
        CacheMark::Miss => out.extend_from_slice(b"x-cache: MISS\r\n"),
        CacheMark::None => {}
    }

    out.extend_from_slice(b"connection: close\r\n\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_hit_headers() {
        let headers = render_headers(Version::Http11, StatusCode::Ok, "text/html", 2, CacheMark::Hit);
        let text = String::from_utf8(headers).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.contains("x-cache: HIT\r\n"));
        assert!(text.ends_with("connection: close\r\n\r\n"));
    }

    #[test]
    fn omits_cache_header_when_not_applicable() {
        let headers =
            render_headers(Version::Http11, StatusCode::NotFound, "text/html", 0, CacheMark::None);
        let text = String::from_utf8(headers).unwrap();
        assert!(!text.contains("x-cache"));
    }
}
