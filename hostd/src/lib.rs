//! hostd library
//!
//! Core modules of the host provisioning daemon: tracked remote tasks,
//! reverse proxy control and the installation pipeline.

pub mod app;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod proxy;
pub mod remote;
pub mod server;
pub mod storage;
pub mod utils;
