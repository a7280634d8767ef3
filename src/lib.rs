//! Client for the LXD REST API
//!
//! Remote resources get local object semantics ([`model`]), background
//! operations can be awaited ([`operation`]) and commands can be run inside
//! instances over websockets ([`exec`]).

pub mod config;
pub mod error;
pub mod exec;
pub mod lxd;
pub mod model;
pub mod operation;

pub use config::Config;
pub use error::{Error, Result};
pub use exec::{Decode, ExecOptions, ExecOutput, ExecResult, RawExecSession, TextEncoding};
pub use lxd::client::{Client, HostInfo};
pub use lxd::path::ApiPath;
pub use model::{
    Entity, Image, Instance, Kind, Network, Profile, StoragePool, WarningPolicy,
};
pub use operation::{Operation, OperationStatus};
