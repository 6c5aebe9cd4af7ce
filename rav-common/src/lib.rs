//! # RenovationAdvisor Common Library
//!
//! Shared code for the RenovationAdvisor services:
//! - Layered configuration (CLI → ENV → TOML → defaults)
//! - SQLite schema initialization
//! - Bearer-token authentication primitives
//! - Phone number normalization and timestamp helpers

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod phone;
pub mod time;

pub use error::{Error, Result};
