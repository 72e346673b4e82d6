//! Domain models

pub mod server;
pub mod task;
