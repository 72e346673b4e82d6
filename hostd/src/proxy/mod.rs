//! Reverse proxy management

pub mod commands;
pub mod config;
pub mod controller;
pub mod status;
