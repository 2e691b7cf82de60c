//! Local-first record store.
//!
//! Each registered model owns one table, a JSON object mapping record ids to
//! stored records, mirrored to the backend under the model's name. Writes are
//! merges: the merged table is persisted before it replaces the in-memory
//! one, and listeners hear about it only afterwards.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::debug;

use crate::action::{ActionDescriptor, Instance, ModelClass};
use crate::augment::{Augmentations, Utils};
use crate::error::{Error, Result};
use crate::model::{self, Model, RecordId};
use crate::resource::Resource;
use crate::session::Session;
use crate::storage::{Backend, NullBackend};

type Table = Map<String, Value>;
type Listener = Arc<dyn Fn(&str) + Send + Sync>;

pub struct Store {
    tables: HashMap<&'static str, Mutex<Table>>,
    resources: HashMap<&'static str, Resource>,
    backend: Arc<dyn Backend>,
    augmentations: Augmentations,
    listeners: RwLock<Vec<Listener>>,
}

pub struct StoreBuilder {
    backend: Arc<dyn Backend>,
    utils: Utils,
    augmentations: Vec<(String, Arc<dyn Any + Send + Sync>)>,
    resources: Vec<Resource>,
}

impl StoreBuilder {
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn augmentation<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.augmentations.push((name.into(), Arc::new(value)));
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn resources(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.resources.extend(resources);
        self
    }

    /// Validates every registration and loads persisted tables.
    ///
    /// Fails on the first missing capability or duplicated member, before
    /// any action can run.
    pub fn build(self) -> Result<Store> {
        let mut augmentations = Augmentations::new(self.utils);
        for (name, value) in self.augmentations {
            augmentations.insert(name, value)?;
        }

        let mut resources = HashMap::new();
        for resource in self.resources {
            validate(&resource, &augmentations)?;
            let model = resource.model();
            if resources.insert(model, resource).is_some() {
                return Err(Error::DuplicateMember {
                    member: model.into(),
                    target: "store".into(),
                });
            }
        }

        let store = Store {
            tables: resources.keys().map(|&m| (m, Mutex::new(Table::new()))).collect(),
            resources,
            backend: self.backend,
            augmentations,
            listeners: RwLock::new(Vec::new()),
        };

        for model in store.resources.keys() {
            let state = store.backend.get_item(model)?;
            store.set_store(model, state.as_deref().unwrap_or("{}"))?;
        }

        Ok(store)
    }
}

/// Checks one resource's actions against the augmentation set and against
/// each other. Class members share a namespace with the augmentations;
/// instance members additionally with the model's fields.
fn validate(resource: &Resource, augmentations: &Augmentations) -> Result<()> {
    for action in resource.actions() {
        if let Some(missing) = action.requirements.iter().find(|c| !augmentations.satisfies(c)) {
            return Err(Error::CapabilityMissing {
                action: action.name.into(),
                capability: missing.name().into(),
            });
        }
    }

    let model = resource.model();
    let mut class_members: HashSet<&str> = augmentations.names().into_iter().collect();
    for action in resource.class_actions() {
        if !class_members.insert(action.name) {
            return Err(duplicate(action.name, model));
        }
    }

    let mut instance_members: HashSet<&str> = augmentations.names().into_iter().collect();
    instance_members.insert("id");
    instance_members.extend(resource.fields().iter().copied());
    for action in resource.instance_actions() {
        if !instance_members.insert(action.name) {
            return Err(duplicate(action.name, &format!("{model} instance")));
        }
    }

    Ok(())
}

fn duplicate(member: &str, target: &str) -> Error {
    Error::DuplicateMember {
        member: member.into(),
        target: target.into(),
    }
}

impl Store {
    /// Starts a store with `utils`, no resources, and a backend that
    /// persists nothing.
    pub fn builder(utils: Utils) -> StoreBuilder {
        StoreBuilder {
            backend: Arc::new(NullBackend),
            utils,
            augmentations: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn augmentations(&self) -> &Augmentations {
        &self.augmentations
    }

    pub fn session(&self) -> &Arc<RwLock<Session>> {
        self.augmentations.session()
    }

    pub fn utils(&self) -> &Utils {
        self.augmentations.utils()
    }

    pub fn models(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }

    pub fn class<M: Model>(&self) -> ModelClass<'_, M> {
        ModelClass::new(self)
    }

    pub fn bind<M: Model>(&self, record: M) -> Instance<'_, M> {
        Instance::new(self, record)
    }

    pub(crate) fn is_attached(&self, model: &str, descriptor: &ActionDescriptor) -> bool {
        self.resources.get(model).is_some_and(|r| {
            r.actions()
                .iter()
                .any(|a| a.action == descriptor.action && a.class_method == descriptor.class_method)
        })
    }

    /// Registers a callback run with the model name after every durable write.
    pub fn on_update(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Stores a record under its id. Hooks run on a clone, so `record` itself
    /// is never modified.
    pub fn save<M: Model>(&self, record: &M) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| Error::MissingIdentifier(M::NAME.into()))?;

        let mut stored = record.clone();
        stored.on_save(&self.augmentations)?;

        let mut update = Map::new();
        update.insert(id.to_string(), Value::Object(model::export(&stored)?));
        self.update_store(M::NAME, update)
    }

    /// Replaces the record with a tombstone.
    pub fn delete<M: Model>(&self, record: &M) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| Error::MissingIdentifier(M::NAME.into()))?;

        let mut update = Map::new();
        update.insert(id.to_string(), Value::Null);
        self.update_store(M::NAME, update)
    }

    /// Merges `update` into the model's table: persisted first, committed
    /// second, listeners last. A persist failure leaves the table as it was.
    pub fn update_store(&self, model: &str, update: Map<String, Value>) -> Result<()> {
        {
            let mut table = self.table(model)?.lock();
            let mut merged = table.clone();
            for (id, value) in update {
                merged.insert(id, value);
            }

            let serialized = serde_json::to_string(&merged)?;
            self.backend.set_item(model, &serialized)?;
            *table = merged;
        }

        debug!(model, "store updated");
        self.notify(model);
        Ok(())
    }

    /// Replaces the model's table with a serialized one.
    pub fn set_store(&self, model: &str, serialization: &str) -> Result<()> {
        let state = match serde_json::from_str(serialization)? {
            Value::Object(table) => table,
            other => {
                let err = <serde_json::Error as serde::de::Error>::invalid_type(
                    serde::de::Unexpected::Other(json_kind(&other)),
                    &"a table object",
                );
                return Err(err.into());
            }
        };
        *self.table(model)?.lock() = state;
        Ok(())
    }

    /// Serializes the model's table, tombstones included.
    pub fn export(&self, model: &str) -> Result<String> {
        let table = self.table(model)?.lock();
        Ok(serde_json::to_string(&*table)?)
    }

    /// Live records matching `predicate`, in insertion order.
    ///
    /// The predicate sees records as stored; `on_load` runs only on matches.
    pub fn query<M: Model>(&self, predicate: impl Fn(&M) -> bool) -> Result<Vec<M>> {
        let mut matches = Vec::new();
        for value in self.live_records(M::NAME)? {
            let record = model::import::<M>(&value)?;
            if predicate(&record) {
                matches.push(record);
            }
        }

        for record in &mut matches {
            record.on_load(&self.augmentations)?;
        }
        Ok(matches)
    }

    /// First live record matching `predicate`.
    pub fn find<M: Model>(&self, predicate: impl Fn(&M) -> bool) -> Result<Option<M>> {
        for value in self.live_records(M::NAME)? {
            let mut record = model::import::<M>(&value)?;
            if predicate(&record) {
                record.on_load(&self.augmentations)?;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn get<M: Model>(&self, id: &RecordId) -> Result<M> {
        let value = self
            .table(M::NAME)?
            .lock()
            .get(id.as_str())
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| Error::RecordNotFound {
                model: M::NAME.into(),
                id: id.to_string(),
            })?;

        let mut record = model::import::<M>(&value)?;
        record.on_load(&self.augmentations)?;
        Ok(record)
    }

    pub fn contains<M: Model>(&self, id: &RecordId) -> Result<bool> {
        let table = self.table(M::NAME)?.lock();
        Ok(table.get(id.as_str()).is_some_and(|v| !v.is_null()))
    }

    fn live_records(&self, model: &str) -> Result<Vec<Value>> {
        let table = self.table(model)?.lock();
        Ok(table.values().filter(|v| !v.is_null()).cloned().collect())
    }

    fn table(&self, model: &str) -> Result<&Mutex<Table>> {
        self.tables
            .get(model)
            .ok_or_else(|| Error::UnknownModel(model.into()))
    }

    fn notify(&self, model: &str) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(model);
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut models: Vec<_> = self.models().collect();
        models.sort_unstable();
        f.debug_struct("Store")
            .field("models", &models)
            .field("augmentations", &self.augmentations)
            .finish_non_exhaustive()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
