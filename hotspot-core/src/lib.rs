//! Core library for the Wi-Fi access point control service.
//! This crate defines the shared data structures and the low-level control
//! backend trait, and provides the AP controller state machine, the
//! process-resident service with its control socket, and the client facade.
//! Backend implementations are selected at build time by cargo features.

pub mod backends;
pub mod controller;
pub mod manager;
pub mod proto;
pub mod service;
pub mod store;
pub mod traits;
pub mod web;

// Define a shared Error and Result type for the entire crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[cfg(feature = "backend_wpa_dbus")]
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[cfg(feature = "backend_wpa_dbus")]
    #[error("zvariant error: {0}")]
    Zvariant(#[from] zbus::zvariant::Error),

    #[error("Web server error: {0}")]
    WebServer(#[from] axum::BoxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
