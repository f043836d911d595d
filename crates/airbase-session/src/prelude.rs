pub use crate::registry::{ConnectionId, ConnectionRecord, SessionRegistry, WebSocketStats};
