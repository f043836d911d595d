use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::id::ServiceName;

/// One registered downstream service. Built from static configuration at
/// gateway startup and immutable for the process lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    pub base_url: Url,
    #[serde(default = "ServiceDescriptor::default_health_path")]
    pub health_path: String,
    #[serde(default = "ServiceDescriptor::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ServiceDescriptor {
    pub fn default_health_path() -> String {
        "/health".to_string()
    }

    pub fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.0.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if self.timeout_ms == 0 {
            return Err(DescriptorError::ZeroTimeout {
                service: self.name.0.clone(),
            });
        }
        if self.base_url.cannot_be_a_base() {
            return Err(DescriptorError::InvalidBaseUrl {
                service: self.name.0.clone(),
                url: self.base_url.to_string(),
            });
        }
        if !self.health_path.starts_with('/') {
            return Err(DescriptorError::RelativeHealthPath {
                service: self.name.0.clone(),
                path: self.health_path.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("service name cannot be empty")]
    EmptyName,
    #[error("service `{service}` has timeout_ms = 0; timeouts must be positive")]
    ZeroTimeout { service: String },
    #[error("service `{service}` base_url `{url}` cannot be used as a base")]
    InvalidBaseUrl { service: String, url: String },
    #[error("service `{service}` health_path `{path}` must start with `/`")]
    RelativeHealthPath { service: String, path: String },
}
