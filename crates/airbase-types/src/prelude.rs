pub use crate::id::{Id, ServiceName};
pub use crate::service::{DescriptorError, ServiceDescriptor};
pub use crate::time::{now_ms, Timestamp};
