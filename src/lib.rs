//! Messaging core of the woosh chat client.
//!
//! [`Woosh`] wires the pieces together: a [`Store`] holding users and
//! messages, the [`Session`] of the logged-in user, the server gateway and
//! the [`Cryptography`] engine that keeps private keys and message contents
//! end-to-end encrypted.

pub mod action;
pub mod api;
pub mod augment;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod repeating_task;
pub mod resource;
pub mod resources;
pub mod session;
pub mod storage;
pub mod store;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

pub use crate::action::{Capability, ClassAction, Context, Instance, InstanceAction, ModelClass};
pub use crate::api::{ApiGateway, HttpApiClient, Method, Request};
pub use crate::augment::Utils;
pub use crate::config::Config;
pub use crate::crypto::{Cryptography, KdfParams, SealFormat};
pub use crate::error::{Error, Result};
pub use crate::model::{Model, RecordId};
pub use crate::repeating_task::RepeatingTask;
pub use crate::resource::Resource;
pub use crate::resources::{Message, User};
pub use crate::session::Session;
pub use crate::storage::{Backend, FileBackend, MemoryBackend, NullBackend};
pub use crate::store::Store;

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, defaulting to
/// `woosh=info`. Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("woosh=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The application store with the messaging resources attached.
pub struct Woosh {
    store: Arc<Store>,
    config: Config,
}

impl Woosh {
    /// Opens the persisted store under `config.data_dir` and talks to the
    /// server at `config.api_url`.
    pub fn open(config: Config) -> Result<Self> {
        let backend = FileBackend::new(&config.data_dir)?;
        let api = HttpApiClient::new(&config.api_url)?;
        let crypto = Cryptography::new(config.key_bits).with_seal_format(config.seal_format);
        let utils = Utils::new(Arc::new(api), crypto);

        info!(data_dir = %config.data_dir.display(), api_url = %config.api_url, "opening store");
        Self::with_parts(config, Arc::new(backend), utils)
    }

    pub fn with_parts(config: Config, backend: Arc<dyn Backend>, utils: Utils) -> Result<Self> {
        let store = Store::builder(utils)
            .backend(backend)
            .resources(resources::all())
            .build()?;
        Ok(Self {
            store: Arc::new(store),
            config,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn users(&self) -> ModelClass<'_, User> {
        self.store.class()
    }

    pub fn messages(&self) -> ModelClass<'_, Message> {
        self.store.class()
    }

    pub fn on_update(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.store.on_update(listener);
    }

    /// A robust task polling the inbox with the configured history policy.
    /// Start it with `config().poll_interval` once logged in.
    pub fn poller(&self) -> RepeatingTask {
        let store = self.store.clone();
        let clear_history = self.config.clear_history;
        RepeatingTask::new(move || {
            let store = store.clone();
            async move {
                store.class::<Message>().poll(clear_history).await?;
                Ok(())
            }
        })
    }
}
