//! TCP side of the receiver.

pub mod server;

pub use server::ConnectionManager;
