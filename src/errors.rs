//! Request-level and startup-level error taxonomy.

use crate::http::types::Version;
use std::{fmt, io};

/// Per-request error, mapped to an HTTP status and a minimal HTML body.
///
/// Never escapes a handler thread: every variant is rendered to bytes and
/// written to the socket, then discarded.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    NotImplemented,
    InternalServerError,
    ServiceUnavailable,
}

macro_rules! http_errors {
    ($($name:ident: $code:literal, $reason:literal;)*) => {
        impl ErrorKind {
            const fn reason(&self) -> &'static str {
                match self {
                    $(Self::$name => $reason,)*
                }
            }

            pub(crate) const fn status_code(&self) -> u16 {
                match self {
                    $(Self::$name => $code,)*
                }
            }
        }
    };
}

http_errors! {
    BadRequest: 400, "Bad Request";
    Forbidden: 403, "Forbidden";
    NotFound: 404, "Not Found";
    InternalServerError: 500, "Internal Server Error";
    NotImplemented: 501, "Not Implemented";
    ServiceUnavailable: 503, "Service Unavailable";
}

/// The verbose 503 page: unlike the other statuses' one-line `<h1>` body,
/// operators hitting this page need to know the overload is expected
/// behavior (admission control protecting accepted work) and that a retry
/// is the right response, not a bug report.
const SERVICE_UNAVAILABLE_BODY: &str = "\
<h1>503 Service Unavailable</h1>\
<p>This worker's connection queue is full and new connections are being \
refused so in-flight requests keep their latency budget.</p>\
<p>Retry after 1 second. If this persists, the server needs more worker \
processes or threads per worker than its current configuration provides.</p>";

impl ErrorKind {
    /// Renders the status line, headers and body for this error. Every case
    /// but `ServiceUnavailable` gets a minimal `<h1>NNN Reason</h1>` body;
    /// `ServiceUnavailable` gets the verbose overload page above and a
    /// `Retry-After: 1` header.
    pub(crate) fn render(&self, version: Version) -> Vec<u8> {
        match self {
            Self::ServiceUnavailable => {
                render_error(version, self.status_code(), self.reason(), SERVICE_UNAVAILABLE_BODY, Some(1))
            }
            _ => {
                let body = format!("<h1>{} {}</h1>", self.status_code(), self.reason());
                render_error(version, self.status_code(), self.reason(), &body, None)
            }
        }
    }
}

fn render_error(version: Version, code: u16, reason: &str, body: &str, retry_after: Option<u32>) -> Vec<u8> {
    let version_token = version.as_str();
    let mut head = format!(
        "{version_token} {code} {reason}\r\n\
         content-type: text/html\r\n\
         content-length: {}\r\n",
        body.len()
    );
    if let Some(secs) = retry_after {
        head.push_str(&format!("retry-after: {secs}\r\n"));
    }
    head.push_str("connection: close\r\n\r\n");
    head.into_bytes().into_iter().chain(body.as_bytes().iter().copied()).collect()
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code(), self.reason())
    }
}

impl std::error::Error for ErrorKind {}

/// Fatal startup error. `main` maps each variant to a distinct exit code so
/// an operator's process supervisor can tell the three cases apart without
/// parsing log text.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listening socket: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to initialize shared statistics: {0}")]
    StatsInit(#[source] io::Error),

    #[error("failed to open log file: {0}")]
    LoggerInit(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ServerError {
    /// Exit code an operator's process supervisor can key off of.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Bind(_) => 1,
            ServerError::StatsInit(_) => 2,
            ServerError::LoggerInit(_) => 3,
            ServerError::Config(_) => 1,
        }
    }
}
