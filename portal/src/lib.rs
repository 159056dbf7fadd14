//! Bare-metal node provisioning portal: serves iPXE scripts, Ignition
//! documents and identity credentials to booting machines, and tracks each
//! node's target vs. active configuration version.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod pki;
pub mod renderer;
pub mod store;
pub mod tls;
pub mod types;
