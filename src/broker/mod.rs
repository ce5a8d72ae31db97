//! The `broker` module holds the server's shared state: the registry of
//! authenticated sessions and the broadcast fan-out over their chat streams.

pub mod engine;
pub mod message;
pub mod session;

pub use engine::SessionRegistry;
pub use message::{ServerMessage, Timestamp};
pub use session::{Session, SessionInfo, Sink, Token};

#[cfg(test)]
mod tests;
