// Homeroom: the live messaging feed core of a parent/teacher communication
// tool. The crate owns feed state and delivery semantics; rendering and the
// actual HTTP/realtime plumbing live behind the traits in `transport`.

pub mod errors;
pub mod feed;
pub mod models;
pub mod nav;
pub mod transport;

// Re-export main types for convenience
pub use errors::{SettleFailure, TransportError};
pub use feed::{FeedCommand, FeedEvent, FeedHandle, FeedSession, FeedSnapshot, SessionConfig};
pub use models::*;
