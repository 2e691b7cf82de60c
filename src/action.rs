//! Business logic attached to models.
//!
//! Actions are declared as trait impls and registered per model through a
//! [`Resource`](crate::resource::Resource). They run with an explicit
//! [`Context`] and are invoked through [`ModelClass`] and [`Instance`]
//! handles, which refuse actions the store did not attach.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::augment::Utils;
use crate::error::{Error, Result};
use crate::model::{Model, RecordId};
use crate::session::{Credentials, Session};
use crate::store::Store;

/// A member an action needs from the store's augmentation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Access to the other registered models.
    Resources,
    Utils,
    Session,
    /// A custom augmentation registered under this name.
    Named(&'static str),
}

impl Capability {
    pub const BUILTIN: [Capability; 3] = [Capability::Resources, Capability::Utils, Capability::Session];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Resources => "resources",
            Capability::Utils => "utils",
            Capability::Session => "session",
            Capability::Named(name) => name,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registration metadata of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDescriptor {
    /// The implementing type; two actions sharing a name stay distinct.
    pub action: TypeId,
    pub name: &'static str,
    pub class_method: bool,
    pub requirements: &'static [Capability],
}

/// An action invoked on the model class.
#[async_trait]
pub trait ClassAction<M: Model>: 'static {
    const NAME: &'static str;
    const REQUIREMENTS: &'static [Capability];

    type Args: Send;
    type Output: Send;

    async fn call(cx: &Context<'_>, args: Self::Args) -> Result<Self::Output>;

    fn descriptor() -> ActionDescriptor {
        ActionDescriptor {
            action: TypeId::of::<Self>(),
            name: Self::NAME,
            class_method: true,
            requirements: Self::REQUIREMENTS,
        }
    }
}

/// An action invoked on one record, its subject.
#[async_trait]
pub trait InstanceAction<M: Model>: 'static {
    const NAME: &'static str;
    const REQUIREMENTS: &'static [Capability];

    type Args: Send;
    type Output: Send;

    async fn call(cx: &Context<'_>, subject: &M, args: Self::Args) -> Result<Self::Output>;

    fn descriptor() -> ActionDescriptor {
        ActionDescriptor {
            action: TypeId::of::<Self>(),
            name: Self::NAME,
            class_method: false,
            requirements: Self::REQUIREMENTS,
        }
    }
}

/// What an action sees of the store while it runs.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    store: &'a Store,
}

impl<'a> Context<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    pub fn utils(&self) -> &'a Utils {
        self.store.augmentations().utils()
    }

    pub fn session(&self) -> &'a Arc<RwLock<Session>> {
        self.store.augmentations().session()
    }

    pub fn augmentation<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.store.augmentations().get(name)
    }

    /// Server credentials of the current session.
    pub fn credentials(&self) -> Result<Credentials> {
        self.session().read().credentials()
    }

    pub fn username(&self) -> Option<String> {
        self.session().read().username().map(str::to_owned)
    }

    /// Whether `username` is the logged-in user.
    pub fn is_me(&self, username: Option<&str>) -> bool {
        self.session().read().is(username)
    }

    pub fn class<M: Model>(&self) -> ModelClass<'a, M> {
        self.store.class()
    }

    pub fn bind<M: Model>(&self, record: M) -> Instance<'a, M> {
        self.store.bind(record)
    }
}

/// Handle on a model type within one store.
pub struct ModelClass<'a, M> {
    store: &'a Store,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for ModelClass<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for ModelClass<'_, M> {}

impl<'a, M: Model> ModelClass<'a, M> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            _model: PhantomData,
        }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    pub async fn invoke<A: ClassAction<M>>(&self, args: A::Args) -> Result<A::Output> {
        self.ensure_attached(A::descriptor())?;
        A::call(&Context::new(self.store), args).await
    }

    pub fn bind(&self, record: M) -> Instance<'a, M> {
        Instance::new(self.store, record)
    }

    pub fn get(&self, id: &RecordId) -> Result<Instance<'a, M>> {
        Ok(self.bind(self.store.get::<M>(id)?))
    }

    pub fn query(&self, predicate: impl Fn(&M) -> bool) -> Result<Vec<Instance<'a, M>>> {
        let records = self.store.query::<M>(predicate)?;
        Ok(records.into_iter().map(|r| self.bind(r)).collect())
    }

    pub fn find(&self, predicate: impl Fn(&M) -> bool) -> Result<Option<Instance<'a, M>>> {
        Ok(self.store.find::<M>(predicate)?.map(|r| self.bind(r)))
    }

    fn ensure_attached(&self, descriptor: ActionDescriptor) -> Result<()> {
        if self.store.is_attached(M::NAME, &descriptor) {
            Ok(())
        } else {
            Err(Error::ActionNotAttached {
                action: descriptor.name.into(),
                model: M::NAME.into(),
            })
        }
    }
}

/// A record bound to the store it belongs to.
pub struct Instance<'a, M> {
    store: &'a Store,
    record: M,
}

impl<'a, M: Model> Instance<'a, M> {
    pub(crate) fn new(store: &'a Store, record: M) -> Self {
        Self { store, record }
    }

    pub fn record(&self) -> &M {
        &self.record
    }

    pub fn into_inner(self) -> M {
        self.record
    }

    pub fn save(&self) -> Result<()> {
        self.store.save(&self.record)
    }

    pub fn delete(&self) -> Result<()> {
        self.store.delete(&self.record)
    }

    pub async fn invoke<A: InstanceAction<M>>(&self, args: A::Args) -> Result<A::Output> {
        ModelClass::<M>::new(self.store).ensure_attached(A::descriptor())?;
        A::call(&Context::new(self.store), &self.record, args).await
    }
}

impl<M> Deref for Instance<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.record
    }
}

impl<M> DerefMut for Instance<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.record
    }
}

impl<M: fmt::Debug> fmt::Debug for Instance<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.record.fmt(f)
    }
}
