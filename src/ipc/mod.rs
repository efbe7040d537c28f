//! Newline-delimited JSON event transport over a Unix socket.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::DubClient;
pub use protocol::{ClientEvent, ServerEvent};
pub use server::{ConnectionHandler, EventReceiver, EventSender, IpcServer};
