pub use crate::codes;
pub use crate::codes::ErrorCode;
pub use crate::obj::{ErrorBuilder, ErrorObj, PublicErrorView};
pub use crate::retry::RetryClass;
