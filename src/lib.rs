//! OpenDesk: run the scripts in a directory as tasks over HTTP.
//!
//! - [`store`]: the `scripts.json` manifest mapping ids to filenames.
//! - [`registry`]: reconciles the manifest with the scripts directory.
//! - [`gateway`]: resolves a request to a script and runs it.
//! - [`api`] and [`server`]: the HTTP routes and the listener lifecycle.
//! - [`client`]: talks to a remote server.

pub mod api;
pub mod client;
pub mod config;
pub mod gateway;
pub mod models;
pub mod registry;
pub mod server;
pub mod store;
