//! Remote execution: transport, per-server locks and tracked tasks

pub mod locks;
pub mod runner;
pub mod shell;
