//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// Http Status Codes
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.2.1
    Continue = 100,
    /// 15.2.2
    SwitchingProtocols = 101,
    /// 15.3.1
    Ok = 200,
    /// 15.3.3
    Accepted = 202,
    /// 15.3.5
    NoContent = 204,
    /// 15.3.7
    PartialContent = 206,
    /// 15.4.5
    NotModified = 304,
    /// 15.5.1
    BadRequest = 400,
    /// 15.5.5
    Forbidden = 403,
    /// 15.5.5 (not found)
    NotFound = 404,
    /// 15.5.6
    MethodNotAllowed = 405,
    /// 15.5.9
    RequestTimeout = 408,
    /// 15.5.14
    ContentTooLarge = 413,
    /// 15.5.16
    UnsupportedMediaType = 415,
    /// 15.5.17
    RangeNotSatisfiable = 416,
    /// Not in RFC 9110 core table; defined by RFC 6585 §4.
    TooManyRequests = 429,
    /// 15.6.1
    InternalServerError = 500,
    /// 15.6.2
    NotImplemented = 501,
    /// 15.6.5
    ServiceUnavailable = 503,
}

impl Status {
    /// The canonical reason phrase for this status, as used in the status
    /// line (`HTTP/<v> <code> <phrase>`).
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::Accepted => "Accepted",
            Self::NoContent => "No Content",
            Self::PartialContent => "Partial Content",
            Self::NotModified => "Not Modified",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::RequestTimeout => "Request Timeout",
            Self::ContentTooLarge => "Payload Too Large",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::RangeNotSatisfiable => "Range Not Satisfiable",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// The numeric status code.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Whether this status is >= 400 (a "failed" request per §6's metrics
    /// definition of `failed_requests`).
    pub fn is_failure(&self) -> bool {
        self.code() >= 400
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{} {}", self.code(), self.reason_phrase()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reports_code_and_reason() {
        assert_eq!(Status::NotFound.code(), 404);
        assert_eq!(Status::NotFound.reason_phrase(), "Not Found");
    }

    #[test]
    fn classifies_failures_by_the_400_boundary() {
        assert!(!Status::Ok.is_failure());
        assert!(!Status::PartialContent.is_failure());
        assert!(Status::BadRequest.is_failure());
        assert!(Status::InternalServerError.is_failure());
    }
}
