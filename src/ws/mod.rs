//! WebSocket protocol and session handling

pub mod codec;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod protocol;
pub mod session;

pub use error::SessionError;
pub use lifecycle::{CloseKind, Lifecycle, SessionState};
pub use session::{SessionHandle, SessionRegistry};
