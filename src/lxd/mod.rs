//! LXD API interaction module
//!
//! This module provides the transport the object model is built on:
//! authentication material, the HTTP client, the response envelope, the
//! path builder and the operation websockets.
//!
//! # Module Structure
//!
//! - [`auth`] - TLS client identity and server trust
//! - [`client`] - Main client, host info and extension checks
//! - [`envelope`] - `sync` / `async` response envelope
//! - [`http`] - HTTP utilities for REST API calls
//! - [`path`] - Explicit API path builder
//! - [`websocket`] - Duplex streams for operation channels
//!
//! # Example
//!
//! ```ignore
//! use lxdc::{Client, Config};
//! use lxdc::lxd::path::ApiPath;
//!
//! async fn example() -> lxdc::Result<()> {
//!     let client = Client::new(Config::load()?).await?;
//!     let instances = client.get(&ApiPath::collection("instances")).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod envelope;
pub mod http;
pub mod path;
pub mod websocket;
