//! Resource kinds
//!
//! Attribute tables for the resource types the object model ships with.

use super::entity::Entity;
use super::schema::{Attribute, Coerce, Kind};
use serde_json::Value;

/// Containers and virtual machines
pub struct InstanceKind;

impl Kind for InstanceKind {
    const NAME: &'static str = "instance";
    const COLLECTION: &'static str = "instances";
    const KEY: &'static str = "name";
    const SCHEMA: &'static [Attribute] = &[
        Attribute::new("name").readonly(),
        Attribute::new("architecture"),
        Attribute::new("config"),
        Attribute::new("devices"),
        Attribute::new("ephemeral").coerce(Coerce::Boolean),
        Attribute::new("profiles"),
        Attribute::new("description").optional(),
        Attribute::new("stateful").readonly().optional(),
        Attribute::new("status").readonly(),
        Attribute::new("status_code").readonly().coerce(Coerce::Integer),
        Attribute::new("type").readonly().optional(),
        Attribute::new("location").readonly().optional(),
        Attribute::new("project").readonly().optional(),
        Attribute::new("created_at").readonly(),
        Attribute::new("last_used_at").readonly().optional(),
        Attribute::new("expanded_config").readonly().optional(),
        Attribute::new("expanded_devices").readonly().optional(),
    ];
}

/// Images in the local image store
pub struct ImageKind;

impl Kind for ImageKind {
    const NAME: &'static str = "image";
    const COLLECTION: &'static str = "images";
    const KEY: &'static str = "fingerprint";
    const SCHEMA: &'static [Attribute] = &[
        Attribute::new("fingerprint").readonly(),
        Attribute::new("aliases").readonly(),
        Attribute::new("architecture").readonly(),
        Attribute::new("auto_update").coerce(Coerce::Boolean),
        Attribute::new("cached").readonly(),
        Attribute::new("filename").readonly(),
        Attribute::new("properties"),
        Attribute::new("public").coerce(Coerce::Boolean),
        Attribute::new("profiles").optional(),
        Attribute::new("size").readonly().coerce(Coerce::Integer),
        Attribute::new("type").readonly().optional(),
        Attribute::new("update_source").readonly().optional(),
        Attribute::new("created_at").readonly(),
        Attribute::new("expires_at").readonly(),
        Attribute::new("last_used_at").readonly(),
        Attribute::new("uploaded_at").readonly(),
    ];

    fn key_from_operation(metadata: &Value) -> Option<String> {
        metadata
            .get("fingerprint")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Configuration profiles
pub struct ProfileKind;

impl Kind for ProfileKind {
    const NAME: &'static str = "profile";
    const COLLECTION: &'static str = "profiles";
    const KEY: &'static str = "name";
    const SCHEMA: &'static [Attribute] = &[
        Attribute::new("name").readonly(),
        Attribute::new("description"),
        Attribute::new("config"),
        Attribute::new("devices"),
        Attribute::new("used_by").readonly(),
        Attribute::new("project").readonly().optional(),
    ];
}

/// Managed networks
pub struct NetworkKind;

impl Kind for NetworkKind {
    const NAME: &'static str = "network";
    const COLLECTION: &'static str = "networks";
    const KEY: &'static str = "name";
    const EXTENSION: Option<&'static str> = Some("network");
    const SCHEMA: &'static [Attribute] = &[
        Attribute::new("name").readonly(),
        Attribute::new("description"),
        Attribute::new("config"),
        Attribute::new("type").readonly(),
        Attribute::new("managed").readonly(),
        Attribute::new("status").readonly().optional(),
        Attribute::new("locations").readonly().optional(),
        Attribute::new("used_by").readonly(),
    ];
}

/// Storage pools
pub struct StoragePoolKind;

impl Kind for StoragePoolKind {
    const NAME: &'static str = "storage pool";
    const COLLECTION: &'static str = "storage-pools";
    const KEY: &'static str = "name";
    const EXTENSION: Option<&'static str> = Some("storage");
    const SCHEMA: &'static [Attribute] = &[
        Attribute::new("name").readonly(),
        Attribute::new("driver").readonly(),
        Attribute::new("description"),
        Attribute::new("config"),
        Attribute::new("status").readonly().optional(),
        Attribute::new("locations").readonly().optional(),
        Attribute::new("used_by").readonly(),
    ];
}

pub type Instance = Entity<InstanceKind>;
pub type Image = Entity<ImageKind>;
pub type Profile = Entity<ProfileKind>;
pub type Network = Entity<NetworkKind>;
pub type StoragePool = Entity<StoragePoolKind>;
