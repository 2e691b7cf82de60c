//! Capabilities injected into actions and record hooks through the store.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::action::Capability;
use crate::api::ApiGateway;
use crate::crypto::Cryptography;
use crate::error::{Error, Result};
use crate::session::Session;

/// Shared helpers: the server gateway and the cryptography engine.
#[derive(Clone)]
pub struct Utils {
    pub api: Arc<dyn ApiGateway>,
    pub cryptography: Arc<Cryptography>,
}

impl Utils {
    pub fn new(api: Arc<dyn ApiGateway>, cryptography: Cryptography) -> Self {
        Self {
            api,
            cryptography: Arc::new(cryptography),
        }
    }
}

impl fmt::Debug for Utils {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Utils")
            .field("cryptography", &self.cryptography)
            .finish_non_exhaustive()
    }
}

type Custom = Arc<dyn Any + Send + Sync>;

/// The merged augmentation set: built-ins plus named custom values.
pub struct Augmentations {
    session: Arc<RwLock<Session>>,
    utils: Utils,
    custom: BTreeMap<String, Custom>,
}

impl Augmentations {
    pub(crate) fn new(utils: Utils) -> Self {
        Self {
            session: Arc::new(RwLock::new(Session::default())),
            utils,
            custom: BTreeMap::new(),
        }
    }

    /// Adds a named augmentation. Names already taken, built-in or custom,
    /// are rejected.
    pub(crate) fn insert(&mut self, name: String, value: Custom) -> Result<()> {
        if self.contains(&name) {
            return Err(Error::DuplicateMember {
                member: name,
                target: "augmentations".into(),
            });
        }
        self.custom.insert(name, value);
        Ok(())
    }

    pub fn session(&self) -> &Arc<RwLock<Session>> {
        &self.session
    }

    pub fn utils(&self) -> &Utils {
        &self.utils
    }

    /// Looks up a custom augmentation, `None` if absent or of another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.custom.get(name).cloned()?.downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        Capability::BUILTIN.iter().any(|c| c.name() == name) || self.custom.contains_key(name)
    }

    pub fn satisfies(&self, capability: &Capability) -> bool {
        self.contains(capability.name())
    }

    /// Every member name, built-ins first.
    pub fn names(&self) -> Vec<&str> {
        Capability::BUILTIN
            .iter()
            .map(|c| c.name())
            .chain(self.custom.keys().map(String::as_str))
            .collect()
    }
}

impl fmt::Debug for Augmentations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Augmentations")
            .field("names", &self.names())
            .finish()
    }
}
