//! Process-level object server and its inbound operations.

pub mod core;
mod handlers;
mod state;

pub use core::{ObjectServer, ObjectServerBuilder, ServerStats, ViewInfo};
