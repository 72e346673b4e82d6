//! Persistent state

pub mod activities;
pub mod layout;
pub mod servers;
pub mod settings;
