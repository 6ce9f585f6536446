//! Client-side sync layer for a Parley server: REST backend, gateway
//! connection, and the state the chat view is rendered from.

pub mod backend;
pub mod banner;
pub mod composer;
pub mod direct;
pub mod error;
pub mod feed;
pub mod presence;
pub mod reactions;
pub mod realtime;
pub mod view;

#[cfg(test)]
mod fake;

pub use backend::{Backend, HttpBackend, LocalFile};
pub use error::ClientError;
