pub use crate::client::{ClientBuilder, NetClient, ReqwestClient};
pub use crate::errors::ClientError;
pub use crate::metrics::{NetMetrics, NetMetricsSnapshot};
pub use crate::types::{Body, NetRequest, NetResponse};
