//! The `service` module implements the chat calls on top of the session
//! registry.

pub mod chat;

pub use chat::{ChatCall, ChatService, StreamEnd};

#[cfg(test)]
mod tests;
