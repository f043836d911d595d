use crate::retry::RetryClass;

/// Stable error code with its default HTTP mapping. Codes are part of the
/// wire contract; the string form never changes once shipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: &'static str,
    pub http_status: u16,
    pub retry: RetryClass,
}

pub const AUTH_UNAUTHENTICATED: ErrorCode = ErrorCode {
    code: "auth.unauthenticated",
    http_status: 401,
    retry: RetryClass::Never,
};

pub const ROUTE_NOT_FOUND: ErrorCode = ErrorCode {
    code: "route.not_found",
    http_status: 404,
    retry: RetryClass::Never,
};

pub const SCHEMA_VALIDATION: ErrorCode = ErrorCode {
    code: "schema.validation",
    http_status: 400,
    retry: RetryClass::Permanent,
};

pub const UPSTREAM_TIMEOUT: ErrorCode = ErrorCode {
    code: "upstream.timeout",
    http_status: 504,
    retry: RetryClass::Transient,
};

pub const UPSTREAM_UNAVAILABLE: ErrorCode = ErrorCode {
    code: "upstream.unavailable",
    http_status: 503,
    retry: RetryClass::Transient,
};

pub const UPSTREAM_ERROR: ErrorCode = ErrorCode {
    code: "upstream.error",
    http_status: 502,
    retry: RetryClass::Transient,
};

pub const INTERNAL: ErrorCode = ErrorCode {
    code: "internal",
    http_status: 500,
    retry: RetryClass::Never,
};
