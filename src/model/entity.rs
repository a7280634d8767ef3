//! Generic entity
//!
//! An [`Entity`] is a locally held map of one remote resource's attributes.
//! It may be fully populated (from a single GET), partially populated (just
//! its key, from a URL list) or constructed locally. Reads of absent
//! attributes fetch, writes are tracked as dirty until saved.

use super::schema::{attribute, Kind};
use super::warnings::WarningSink;
use crate::error::{Error, Result};
use crate::lxd::client::{Client, ClientInner};
use crate::lxd::envelope::Envelope;
use crate::lxd::path::ApiPath;
use crate::operation::Operation;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Weak;

/// One remote resource of kind `K`
pub struct Entity<K: Kind> {
    attributes: Map<String, Value>,
    dirty: HashSet<String>,
    binding: Option<Weak<ClientInner>>,
    /// Set by a successful delete; every later read fails
    deleted: bool,
    _kind: PhantomData<K>,
}

impl<K: Kind> Entity<K> {
    /// Local entity bound to `client`. Every name must be declared.
    pub fn new(client: &Client, attributes: Map<String, Value>) -> Result<Self> {
        let mut entity = Self::detached(attributes)?;
        entity.binding = Some(client.downgrade());
        Ok(entity)
    }

    /// Local entity without a client, e.g. to marshall a create body.
    pub fn detached(attributes: Map<String, Value>) -> Result<Self> {
        let mut entity = Self::empty(None);
        for (name, value) in attributes {
            let value = coerce::<K>(&name, value)?;
            entity.attributes.insert(name, value);
        }
        Ok(entity)
    }

    /// Partially populated entity carrying only its key.
    pub fn partial(client: &Client, key: impl Into<String>) -> Self {
        let mut entity = Self::empty(Some(client.downgrade()));
        entity
            .attributes
            .insert(K::KEY.to_string(), Value::String(key.into()));
        entity
    }

    fn empty(binding: Option<Weak<ClientInner>>) -> Self {
        Self {
            attributes: Map::new(),
            dirty: HashSet::new(),
            binding,
            deleted: false,
            _kind: PhantomData,
        }
    }

    /// Fully populated entity from a server representation.
    fn from_server(client: &Client, fields: Map<String, Value>) -> Self {
        let mut entity = Self::empty(Some(client.downgrade()));
        entity.merge(fields, true, client.warnings());
        entity
    }

    async fn check_extension(client: &Client) -> Result<()> {
        match K::EXTENSION {
            Some(extension) => client.assert_has_api_extension(extension).await,
            None => Ok(()),
        }
    }

    fn collection() -> ApiPath {
        ApiPath::collection(K::COLLECTION)
    }

    /// Fetch one entity by key.
    pub async fn get(client: &Client, key: &str) -> Result<Self> {
        Self::check_extension(client).await?;
        let envelope = client.get(&Self::collection().join(key)).await?;
        let fields = object(envelope.metadata, K::NAME)?;
        Ok(Self::from_server(client, fields))
    }

    /// List the collection.
    ///
    /// URL-only listings yield partial entities; their remaining attributes
    /// are fetched on first read.
    pub async fn all(client: &Client) -> Result<Vec<Self>> {
        Self::check_extension(client).await?;
        let envelope = client.get(&Self::collection()).await?;
        let Value::Array(items) = envelope.metadata else {
            return Err(Error::UnexpectedResponse(format!(
                "{} listing is not an array",
                K::NAME
            )));
        };

        let mut entities = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(url) => {
                    let path = ApiPath::parse(&url);
                    if let Some(key) = path.last_segment() {
                        entities.push(Self::partial(client, key));
                    }
                }
                Value::Object(fields) => entities.push(Self::from_server(client, fields)),
                other => {
                    tracing::debug!(kind = K::NAME, item = %other, "Skipping listing entry");
                }
            }
        }
        Ok(entities)
    }

    /// Whether an entity with this key exists.
    pub async fn exists(client: &Client, key: &str) -> Result<bool> {
        match Self::get(client, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a new entity from `config`.
    ///
    /// With `wait`, an async creation is followed to completion and the
    /// result is fetched in full. Without it, a partial entity is returned.
    pub async fn create(client: &Client, config: Value, wait: bool) -> Result<Self> {
        Self::check_extension(client).await?;
        let envelope = client.post(&Self::collection(), Some(&config)).await?;
        let operation = Operation::resolve(client, &envelope, wait).await?;

        let key = config
            .get(K::KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                operation
                    .as_ref()
                    .and_then(|op| K::key_from_operation(op.metadata()))
            })
            .ok_or_else(|| {
                Error::UnexpectedResponse(format!("cannot determine key of new {}", K::NAME))
            })?;

        tracing::debug!(kind = K::NAME, key = %key, "Created");
        if envelope.is_async() && !wait {
            Ok(Self::partial(client, key))
        } else {
            Self::get(client, &key).await
        }
    }

    /// Client this entity is bound to.
    pub fn client(&self) -> Result<Client> {
        self.binding
            .as_ref()
            .and_then(Client::upgrade)
            .ok_or(Error::Unbound)
    }

    pub fn is_bound(&self) -> bool {
        self.client().is_ok()
    }

    /// Key within the collection, if known.
    pub fn key(&self) -> Option<&str> {
        self.attributes.get(K::KEY).and_then(Value::as_str)
    }

    /// Endpoint path of this entity
    pub fn path(&self) -> Result<ApiPath> {
        let key = self.key().ok_or_else(|| {
            Error::InvalidArgument(format!("{} has no {}", K::NAME, K::KEY))
        })?;
        Ok(Self::collection().join(key))
    }

    /// Read an attribute, fetching once if it was never populated.
    ///
    /// Values already held locally are returned without a client, so a
    /// detached entity can be read before it is created.
    pub async fn attribute(&mut self, name: &str) -> Result<Value> {
        if attribute::<K>(name).is_none() {
            return Err(unknown::<K>(name));
        }
        if self.deleted {
            return Err(Error::Unbound);
        }
        if let Some(value) = self.attributes.get(name) {
            return Ok(value.clone());
        }

        let client = self.client()?;
        self.sync_with(&client, false).await?;
        self.attributes
            .get(name)
            .cloned()
            .ok_or_else(|| unknown::<K>(name))
    }

    /// Local value only; never fetches.
    pub fn peek(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Write an attribute locally and mark it dirty.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = coerce::<K>(name, value.into())?;
        self.attributes.insert(name.to_string(), value);
        self.dirty.insert(name.to_string());
        Ok(())
    }

    /// Attribute names written since the last sync or save
    pub fn dirty(&self) -> &HashSet<String> {
        &self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// All locally held attributes
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Refresh from the server.
    ///
    /// Dirty attributes keep their local value unless `rollback` is set, in
    /// which case everything is overwritten and the dirty set is cleared.
    pub async fn sync(&mut self, rollback: bool) -> Result<()> {
        let client = self.client()?;
        self.sync_with(&client, rollback).await
    }

    async fn sync_with(&mut self, client: &Client, rollback: bool) -> Result<()> {
        let envelope = client.get(&self.path()?).await?;
        let fields = object(envelope.metadata, K::NAME)?;
        self.merge(fields, rollback, client.warnings());
        Ok(())
    }

    /// Apply a server representation. Undeclared fields are dropped and
    /// reported.
    pub(crate) fn merge(&mut self, fields: Map<String, Value>, rollback: bool, warnings: &WarningSink) {
        for (name, value) in fields {
            if attribute::<K>(&name).is_none() {
                warnings.unknown_attribute(K::NAME, &name);
                continue;
            }
            if !rollback && self.dirty.contains(&name) {
                continue;
            }
            self.attributes.insert(name, value);
        }
        if rollback {
            self.dirty.clear();
        }
    }

    /// Writable state as sent by [`Entity::save`].
    ///
    /// Readonly attributes are never included; optional ones only when set.
    pub fn marshall(&self) -> Map<String, Value> {
        let mut body = Map::new();
        for attr in K::SCHEMA.iter().filter(|a| !a.readonly) {
            match self.attributes.get(attr.name) {
                Some(value) => {
                    body.insert(attr.name.to_string(), value.clone());
                }
                None if attr.optional => {}
                None => {
                    body.insert(attr.name.to_string(), Value::Null);
                }
            }
        }
        body
    }

    fn missing_required(&self) -> bool {
        K::SCHEMA
            .iter()
            .filter(|a| !a.readonly && !a.optional)
            .any(|a| !self.attributes.contains_key(a.name))
    }

    /// PUT the marshalled state.
    pub async fn save(&mut self, wait: bool) -> Result<()> {
        let client = self.client()?;
        Self::check_extension(&client).await?;

        // A partial entity would otherwise PUT nulls over server state.
        if self.missing_required() {
            self.sync_with(&client, false).await?;
        }

        let body = Value::Object(self.marshall());
        let envelope = client.put(&self.path()?, &body).await?;
        self.follow(&client, &envelope, wait).await?;
        self.dirty.clear();
        Ok(())
    }

    /// Replace the server state with `obj`, then re-sync.
    pub async fn put(&mut self, obj: &Value, wait: bool) -> Result<()> {
        let client = self.client()?;
        Self::check_extension(&client).await?;
        let envelope = client.put(&self.path()?, obj).await?;
        self.follow(&client, &envelope, wait).await?;
        self.sync_with(&client, true).await
    }

    /// Merge `obj` into the server state, then re-sync.
    pub async fn patch(&mut self, obj: &Value, wait: bool) -> Result<()> {
        let client = self.client()?;
        Self::check_extension(&client).await?;
        let envelope = client.patch(&self.path()?, obj).await?;
        self.follow(&client, &envelope, wait).await?;
        self.sync_with(&client, true).await
    }

    /// DELETE the entity and unbind it from its client.
    pub async fn delete(&mut self, wait: bool) -> Result<()> {
        let client = self.client()?;
        Self::check_extension(&client).await?;
        let envelope = client.delete(&self.path()?).await?;
        self.follow(&client, &envelope, wait).await?;
        self.binding = None;
        self.deleted = true;
        tracing::debug!(kind = K::NAME, key = ?self.key(), "Deleted");
        Ok(())
    }

    async fn follow(&self, client: &Client, envelope: &Envelope, wait: bool) -> Result<()> {
        if let Some(operation) = Operation::resolve(client, envelope, wait).await? {
            tracing::debug!(kind = K::NAME, operation = %operation.id(), "Write completed");
        }
        Ok(())
    }
}

impl<K: Kind> Clone for Entity<K> {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            dirty: self.dirty.clone(),
            binding: self.binding.clone(),
            deleted: self.deleted,
            _kind: PhantomData,
        }
    }
}

impl<K: Kind> std::fmt::Debug for Entity<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &K::NAME)
            .field("key", &self.key())
            .field("attributes", &self.attributes.len())
            .field("dirty", &self.dirty)
            .field("bound", &self.is_bound())
            .finish()
    }
}

fn unknown<K: Kind>(name: &str) -> Error {
    Error::UnknownAttribute {
        kind: K::NAME,
        name: name.to_string(),
    }
}

fn coerce<K: Kind>(name: &str, value: Value) -> Result<Value> {
    let attr = attribute::<K>(name).ok_or_else(|| unknown::<K>(name))?;
    match attr.coerce {
        Some(coerce) => coerce
            .apply(value)
            .map_err(|reason| Error::InvalidArgument(format!("{}.{}: {}", K::NAME, name, reason))),
        None => Ok(value),
    }
}

fn object(metadata: Value, kind: &str) -> Result<Map<String, Value>> {
    match metadata {
        Value::Object(fields) => Ok(fields),
        other => Err(Error::UnexpectedResponse(format!(
            "{kind} response is not an object: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::kinds::{InstanceKind, ProfileKind};
    use crate::model::WarningPolicy;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_marshall_skips_readonly_and_unset_optional() {
        let profile = Entity::<ProfileKind>::detached(fields(json!({
            "name": "web",
            "config": {"limits.cpu": "2"},
            "used_by": ["/1.0/instances/a"]
        })))
        .unwrap();

        let body = profile.marshall();
        assert!(!body.contains_key("name"));
        assert!(!body.contains_key("used_by"));
        assert_eq!(body["config"], json!({"limits.cpu": "2"}));
        assert_eq!(body["description"], Value::Null);
    }

    #[test]
    fn test_set_rejects_undeclared_and_coerces() {
        let mut instance = Entity::<InstanceKind>::detached(Map::new()).unwrap();
        assert!(matches!(
            instance.set("colour", "blue"),
            Err(Error::UnknownAttribute { name, .. }) if name == "colour"
        ));
        assert!(!instance.is_dirty());

        instance.set("ephemeral", "true").unwrap();
        assert_eq!(instance.peek("ephemeral"), Some(&json!(true)));
        assert!(instance.dirty().contains("ephemeral"));

        assert!(matches!(
            instance.set("ephemeral", "maybe"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_merge_keeps_dirty_unless_rollback() {
        let sink = WarningSink::new(WarningPolicy::None);
        let mut profile = Entity::<ProfileKind>::detached(Map::new()).unwrap();
        profile.set("description", "local").unwrap();

        let server = fields(json!({"name": "p", "description": "remote", "config": {}}));
        profile.merge(server.clone(), false, &sink);
        assert_eq!(profile.peek("description"), Some(&json!("local")));
        assert_eq!(profile.peek("name"), Some(&json!("p")));

        profile.merge(server, true, &sink);
        assert_eq!(profile.peek("description"), Some(&json!("remote")));
        assert!(!profile.is_dirty());
    }

    #[test]
    fn test_merge_drops_unknown_fields() {
        let sink = WarningSink::new(WarningPolicy::Once);
        let mut profile = Entity::<ProfileKind>::detached(Map::new()).unwrap();
        profile.merge(fields(json!({"name": "p", "future_field": 1})), false, &sink);
        assert!(profile.peek("future_field").is_none());
        // Already reported once through this sink.
        assert!(!sink.unknown_attribute(ProfileKind::NAME, "future_field"));
    }

    #[test]
    fn test_detached_entity_is_unbound() {
        let profile = Entity::<ProfileKind>::detached(fields(json!({"name": "p"}))).unwrap();
        assert!(matches!(profile.client(), Err(Error::Unbound)));
        assert_eq!(profile.path().unwrap().to_string(), "/1.0/profiles/p");
    }

    #[tokio::test]
    async fn test_detached_entity_reads_local_values() {
        let mut profile = Entity::<ProfileKind>::detached(fields(json!({
            "name": "p",
            "description": "local only"
        })))
        .unwrap();

        assert_eq!(profile.attribute("description").await.unwrap(), json!("local only"));
        assert!(matches!(profile.attribute("config").await, Err(Error::Unbound)));
        assert!(matches!(
            profile.attribute("colour").await,
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[tokio::test]
    async fn test_deleted_entity_refuses_local_reads() {
        let mut profile = Entity::<ProfileKind>::detached(fields(json!({"name": "p"}))).unwrap();
        profile.deleted = true;
        assert!(matches!(profile.attribute("name").await, Err(Error::Unbound)));
    }

    #[test]
    fn test_path_requires_key() {
        let profile = Entity::<ProfileKind>::detached(Map::new()).unwrap();
        assert!(matches!(profile.path(), Err(Error::InvalidArgument(_))));
    }
}
