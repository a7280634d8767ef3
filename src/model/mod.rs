//! Object model
//!
//! Local object semantics over the REST API: declared attribute schemas,
//! lazy fetch on read, dirty tracking and marshalled writes.

pub mod entity;
pub mod kinds;
pub mod schema;
pub mod warnings;

pub use entity::Entity;
pub use kinds::{
    Image, ImageKind, Instance, InstanceKind, Network, NetworkKind, Profile, ProfileKind,
    StoragePool, StoragePoolKind,
};
pub use schema::{Attribute, Coerce, Kind};
pub use warnings::{WarningPolicy, WarningSink};
