#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    /// Retrying cannot help (auth, routing, caller bugs).
    Never,
    /// A later attempt may succeed (timeouts, unreachable downstreams).
    Transient,
    /// The request itself is wrong; the same call will keep failing.
    Permanent,
}

impl RetryClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            RetryClass::Never => "never",
            RetryClass::Transient => "transient",
            RetryClass::Permanent => "permanent",
        }
    }

    /// The gateway itself never retries; this advises callers.
    pub const fn caller_may_retry(self) -> bool {
        matches!(self, RetryClass::Transient)
    }
}
