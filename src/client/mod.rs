//! The `client` module keeps a chat client logged in.
//!
//! [`ChatSession`] is the entry point. It drives a [`ConnectionManager`],
//! which owns a [`Channel`] built by a [`Connector`] and re-authenticates
//! whenever the channel comes back after a drop.

pub mod channel;
pub mod manager;
pub mod session;
pub mod ws_channel;

pub use channel::{Channel, ChatStream, ConnectivityState, Connector};
pub use manager::{ChatEvent, ConnectionManager, LinkState, Phase};
pub use session::{ChatSession, Delivery};
pub use ws_channel::{WsChannel, WsConnector};
