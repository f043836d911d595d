use serde::Serialize;

use crate::codes::ErrorCode;

/// Full error record: one public code + message, plus a dev-only detail
/// string that goes to logs and never onto the wire.
#[derive(Clone, Debug)]
pub struct ErrorObj {
    pub code: ErrorCode,
    pub user_msg: String,
    pub dev_msg: Option<String>,
}

impl ErrorObj {
    pub fn http_status(&self) -> u16 {
        self.code.http_status
    }

    pub fn to_public(&self) -> PublicErrorView {
        PublicErrorView {
            code: self.code.code,
            message: self.user_msg.clone(),
        }
    }
}

impl std::fmt::Display for ErrorObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.dev_msg {
            Some(dev) => write!(f, "[{}] {} ({dev})", self.code.code, self.user_msg),
            None => write!(f, "[{}] {}", self.code.code, self.user_msg),
        }
    }
}

/// What callers are allowed to see.
#[derive(Clone, Debug, Serialize)]
pub struct PublicErrorView {
    pub code: &'static str,
    pub message: String,
}

pub struct ErrorBuilder {
    code: ErrorCode,
    user_msg: Option<String>,
    dev_msg: Option<String>,
}

impl ErrorBuilder {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            user_msg: None,
            dev_msg: None,
        }
    }

    pub fn user_msg(mut self, msg: impl Into<String>) -> Self {
        self.user_msg = Some(msg.into());
        self
    }

    pub fn dev_msg(mut self, msg: impl Into<String>) -> Self {
        self.dev_msg = Some(msg.into());
        self
    }

    pub fn build(self) -> ErrorObj {
        let code = self.code;
        ErrorObj {
            code,
            user_msg: self.user_msg.unwrap_or_else(|| code.code.to_string()),
            dev_msg: self.dev_msg,
        }
    }
}
