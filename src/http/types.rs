//! Core HTTP protocol types: method, version, status code.

use crate::errors::ErrorKind;

/// HTTP request methods recognized on the wire. Anything else is a parse
/// failure; anything other than `GET`/`HEAD` is accepted by the parser but
/// rejected by the pipeline with `501 Not Implemented`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Other,
}

impl Method {
    /// Parses the method token at the start of `src`, returning the method
    /// and the byte offset of the following space.
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), ErrorKind> {
        let space = memchr::memchr(b' ', src).ok_or(ErrorKind::BadRequest)?;
        if space == 0 || space > 15 {
            return Err(ErrorKind::BadRequest);
        }
        let token = &src[..space];
        let method = match token {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            _ if token.iter().all(u8::is_ascii_uppercase) => Method::Other,
            _ => return Err(ErrorKind::BadRequest),
        };
        Ok((method, space))
    }
}

/// HTTP protocol version. Only `HTTP/1.1` and `HTTP/1.0` are understood; any
/// other token is a parse failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok(Version::Http11),
            b"HTTP/1.0" => Ok(Version::Http10),
            _ => Err(ErrorKind::BadRequest),
        }
    }

    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            Version::Http11 => "HTTP/1.1",
            Version::Http10 => "HTTP/1.0",
        }
    }
}

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes used by this server's responses.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            pub(crate) const fn reason(&self) -> &'static str {
                match self { $(StatusCode::$name => $str,)+ }
            }

            pub(crate) const fn code(&self) -> u16 {
                match self { $(StatusCode::$name => $num,)+ }
            }
        }
    }
}

set_status_codes! {
    /// Request served successfully.
    Ok = (200, "OK");
    /// Malformed request line.
    BadRequest = (400, "Bad Request");
    /// Path traversal or directory target.
    Forbidden = (403, "Forbidden");
    /// No such file under the document root.
    NotFound = (404, "Not Found");
    /// Stat or read failure unrelated to the request itself.
    InternalServerError = (500, "Internal Server Error");
    /// Method other than GET/HEAD.
    NotImplemented = (501, "Not Implemented");
    /// Connection queue full.
    ServiceUnavailable = (503, "Service Unavailable");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_and_head() {
        assert_eq!(Method::from_bytes(b"GET /x").unwrap(), (Method::Get, 3));
        assert_eq!(Method::from_bytes(b"HEAD /x").unwrap(), (Method::Head, 4));
    }

    #[test]
    fn other_uppercase_tokens_are_accepted_as_other() {
        assert_eq!(Method::from_bytes(b"POST /x").unwrap(), (Method::Other, 4));
        assert_eq!(
            Method::from_bytes(b"DELETE /x").unwrap(),
            (Method::Other, 6)
        );
    }

    #[test]
    fn rejects_missing_space_or_lowercase() {
        assert!(Method::from_bytes(b"GET").is_err());
        assert!(Method::from_bytes(b"get /x").is_err());
    }

    #[test]
    fn parses_known_versions() {
        assert_eq!(Version::from_bytes(b"HTTP/1.1").unwrap(), Version::Http11);
        assert_eq!(Version::from_bytes(b"HTTP/1.0").unwrap(), Version::Http10);
        assert!(Version::from_bytes(b"HTTP/2.0").is_err());
    }
}
