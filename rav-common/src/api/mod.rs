//! Framework-independent API helpers shared by HTTP services

pub mod auth;
