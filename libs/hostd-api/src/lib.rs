//! HTTP API models shared by hostd and its clients

pub mod models;
