//! Sessions over TCP.

pub mod client;
pub mod server;

pub use client::connect;
pub use server::MuxTcpServer;
