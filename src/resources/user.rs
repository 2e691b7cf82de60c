//! Users, their keys, and the account actions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::action::{Capability, ClassAction, Context, Instance, InstanceAction, ModelClass};
use crate::api::Request;
use crate::augment::Augmentations;
use crate::crypto::{HMAC_B64_LEN, Keys};
use crate::error::{Error, Result};
use crate::model::{self, Model, RecordId};
use crate::resource::Resource;
use crate::resources::message::Message;
use crate::session::Session;

const ACCOUNT_REQUIREMENTS: &[Capability] = &[Capability::Utils, Capability::Session, Capability::Resources];

/// A user as known to this client.
///
/// `private_key` holds the server's at-rest form: the symmetric encryption of
/// the PEM private key followed by its 44-character HMAC tag. The local store
/// keeps the logged-in user's own key encrypted once more under the session's
/// encryption key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: Option<RecordId>,
    pub username: Option<String>,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub info: Option<Value>,
}

impl Model for User {
    const NAME: &'static str = "User";
    const FIELDS: &'static [&'static str] = &["username", "privateKey", "publicKey", "info"];

    fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn on_save(&mut self, augmentations: &Augmentations) -> Result<()> {
        let Some(key) = local_key(augmentations, self.username.as_deref())? else {
            return Ok(());
        };
        if let Some(private_key) = &self.private_key {
            let crypto = &augmentations.utils().cryptography;
            self.private_key = Some(crypto.encrypt_sym(&key, private_key)?);
        }
        Ok(())
    }

    fn on_load(&mut self, augmentations: &Augmentations) -> Result<()> {
        let Some(key) = local_key(augmentations, self.username.as_deref())? else {
            return Ok(());
        };
        if let Some(private_key) = &self.private_key {
            let crypto = &augmentations.utils().cryptography;
            self.private_key = Some(crypto.decrypt_sym(&key, private_key)?);
        }
        Ok(())
    }
}

/// Key sealing `owner`'s private key in local storage. Only the logged-in
/// user's own record is sealed; other records keep the server form.
fn local_key(augmentations: &Augmentations, owner: Option<&str>) -> Result<Option<Zeroizing<String>>> {
    let session = augmentations.session().read();
    match session.master_key() {
        Some(key) if !key.is_empty() && session.is(owner) => {
            session.encryption_key().map(|k| Some(Zeroizing::new(k)))
        }
        _ => Ok(None),
    }
}

pub fn resource() -> Resource {
    Resource::builder::<User>()
        .class_action::<Register>()
        .class_action::<Login>()
        .class_action::<Logout>()
        .class_action::<Me>()
        .class_action::<GetByUsername>()
        .instance_action::<KeysAction>()
        .instance_action::<SendMessage>()
        .finish()
}

/// Creates an account and logs into it.
pub struct Register;

#[async_trait]
impl ClassAction<User> for Register {
    const NAME: &'static str = "register";
    const REQUIREMENTS: &'static [Capability] = ACCOUNT_REQUIREMENTS;

    type Args = (String, String);
    type Output = User;

    async fn call(cx: &Context<'_>, (username, password): (String, String)) -> Result<User> {
        let candidate = Session::new(username.as_str(), password.as_str());
        let auth_key = candidate.auth_key()?;
        let encryption_key = Zeroizing::new(candidate.encryption_key()?);
        let integrity_key = Zeroizing::new(candidate.integrity_key()?);
        drop(candidate);

        let crypto = &cx.utils().cryptography;
        let pair = crypto.generate_key_pair().await?;
        let exported = crypto.export_keys(Some(&pair.private_key), Some(&pair.public_key));
        let (Some(private_pem), Some(public_pem)) = (exported.private_key, exported.public_key)
        else {
            return Err(Error::KeyGeneration("cannot encode the generated key pair".into()));
        };

        let sealed = crypto.encrypt_sym(&encryption_key, &private_pem)?;
        let tag = crypto.hmac(&integrity_key, &sealed)?;

        let request = Request::post("/users").body(json!({
            "username": username,
            "password": auth_key,
            "privateKey": format!("{sealed}{tag}"),
            "publicKey": public_pem,
        }));
        let response = cx.utils().api.request(request).await?;
        let user: User = model::import(&response)?;

        let previous = {
            let mut session = cx.session().write();
            let previous = session.snapshot();
            session.set(username.as_str(), password);
            previous
        };
        if let Err(e) = cx.store().save(&user) {
            cx.session().write().restore(previous);
            return Err(e);
        }

        info!(%username, "registered");
        Ok(user)
    }
}

/// Sets the session and verifies it against the server. Any failure puts the
/// previous session back.
pub struct Login;

#[async_trait]
impl ClassAction<User> for Login {
    const NAME: &'static str = "login";
    const REQUIREMENTS: &'static [Capability] = ACCOUNT_REQUIREMENTS;

    type Args = (String, String);
    type Output = User;

    async fn call(cx: &Context<'_>, (username, password): (String, String)) -> Result<User> {
        let previous = {
            let mut session = cx.session().write();
            let previous = session.snapshot();
            session.set(username.as_str(), password);
            previous
        };

        match fetch_me(cx).await {
            Ok(user) => {
                info!(%username, "logged in");
                Ok(user)
            }
            Err(e) => {
                cx.session().write().restore(previous);
                Err(e)
            }
        }
    }
}

pub struct Logout;

#[async_trait]
impl ClassAction<User> for Logout {
    const NAME: &'static str = "logout";
    const REQUIREMENTS: &'static [Capability] = &[Capability::Session];

    type Args = ();
    type Output = ();

    async fn call(cx: &Context<'_>, _args: ()) -> Result<()> {
        cx.session().write().clear();
        Ok(())
    }
}

/// The logged-in user, from the local store when possible.
pub struct Me;

#[async_trait]
impl ClassAction<User> for Me {
    const NAME: &'static str = "me";
    const REQUIREMENTS: &'static [Capability] = ACCOUNT_REQUIREMENTS;

    type Args = ();
    type Output = User;

    async fn call(cx: &Context<'_>, _args: ()) -> Result<User> {
        if let Some(username) = cx.username() {
            if let Some(user) = cx.store().find::<User>(|u| u.username.as_ref() == Some(&username))? {
                return Ok(user);
            }
        }

        debug!("own user not cached");
        fetch_me(cx).await
    }
}

async fn fetch_me(cx: &Context<'_>) -> Result<User> {
    let request = Request::get("/users/me").credentials(cx.credentials()?);
    let response = cx.utils().api.request(request).await?;
    let user: User = model::import(&response)?;
    cx.store().save(&user)?;
    Ok(user)
}

/// Another user by name, from the local store when possible.
pub struct GetByUsername;

#[async_trait]
impl ClassAction<User> for GetByUsername {
    const NAME: &'static str = "getByUsername";
    const REQUIREMENTS: &'static [Capability] = ACCOUNT_REQUIREMENTS;

    type Args = String;
    type Output = User;

    async fn call(cx: &Context<'_>, username: String) -> Result<User> {
        if let Some(user) = cx.store().find::<User>(|u| u.username.as_ref() == Some(&username))? {
            return Ok(user);
        }

        debug!(%username, "user not cached");
        let request = Request::get("/users/friends")
            .credentials(cx.credentials()?)
            .param("username", username);
        let response = cx.utils().api.request(request).await?;
        let user: User = model::import(&response)?;
        cx.store().save(&user)?;
        Ok(user)
    }
}

/// Parsed keys of a user. The private half is present only for the
/// logged-in user, after its integrity tag checks out.
pub struct KeysAction;

#[async_trait]
impl InstanceAction<User> for KeysAction {
    const NAME: &'static str = "keys";
    const REQUIREMENTS: &'static [Capability] = &[Capability::Utils, Capability::Session];

    type Args = ();
    type Output = Keys;

    async fn call(cx: &Context<'_>, subject: &User, _args: ()) -> Result<Keys> {
        let crypto = &cx.utils().cryptography;

        let private_pem = if cx.is_me(subject.username.as_deref()) {
            let stored = subject
                .private_key
                .as_deref()
                .ok_or_else(|| Error::DataIntegrity("own private key is missing".into()))?;
            let (encryption_key, integrity_key) = {
                let session = cx.session().read();
                (
                    Zeroizing::new(session.encryption_key()?),
                    Zeroizing::new(session.integrity_key()?),
                )
            };

            let (sealed, tag) = split_tag(stored)?;
            crypto.verify_hmac(&integrity_key, sealed, tag)?;
            Some(Zeroizing::new(crypto.decrypt_sym(&encryption_key, sealed)?))
        } else {
            None
        };

        Ok(crypto.import_keys(
            private_pem.as_deref().map(String::as_str),
            subject.public_key.as_deref(),
        ))
    }
}

fn split_tag(stored: &str) -> Result<(&str, &str)> {
    let boundary = stored
        .len()
        .checked_sub(HMAC_B64_LEN)
        .filter(|&at| stored.is_char_boundary(at))
        .ok_or_else(|| Error::DataIntegrity("own private key has no integrity tag".into()))?;
    Ok(stored.split_at(boundary))
}

/// Encrypts `contents` for the subject and sends it.
pub struct SendMessage;

#[async_trait]
impl InstanceAction<User> for SendMessage {
    const NAME: &'static str = "sendMessage";
    const REQUIREMENTS: &'static [Capability] = ACCOUNT_REQUIREMENTS;

    type Args = String;
    type Output = Message;

    async fn call(cx: &Context<'_>, subject: &User, contents: String) -> Result<Message> {
        let recipient_key = cx
            .bind(subject.clone())
            .keys()
            .await?
            .public_key
            .ok_or_else(|| Error::InvalidKey("recipient has no usable public key".into()))?;

        let me = cx.class::<User>().me().await?;
        let own_key = me
            .keys()
            .await?
            .private_key
            .ok_or_else(|| Error::InvalidKey("own private key is unavailable".into()))?;

        let envelope = cx
            .utils()
            .cryptography
            .encrypt_asym(&recipient_key, &own_key, &contents)?;

        let request = Request::post("/messages")
            .credentials(cx.credentials()?)
            .body(json!({"recipient": subject.username, "contents": envelope}));
        let response = cx.utils().api.request(request).await?;

        let mut message: Message = model::import(&response)?;
        message.contents = Some(contents);
        message.rescale_sent_at();
        cx.store().save(&message)?;
        Ok(message)
    }
}

impl<'a> ModelClass<'a, User> {
    pub async fn register(&self, username: &str, password: &str) -> Result<Instance<'a, User>> {
        let user = self
            .invoke::<Register>((username.to_owned(), password.to_owned()))
            .await?;
        Ok(self.bind(user))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Instance<'a, User>> {
        let user = self
            .invoke::<Login>((username.to_owned(), password.to_owned()))
            .await?;
        Ok(self.bind(user))
    }

    pub async fn logout(&self) -> Result<()> {
        self.invoke::<Logout>(()).await
    }

    pub async fn me(&self) -> Result<Instance<'a, User>> {
        let user = self.invoke::<Me>(()).await?;
        Ok(self.bind(user))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Instance<'a, User>> {
        let user = self.invoke::<GetByUsername>(username.to_owned()).await?;
        Ok(self.bind(user))
    }
}

impl Instance<'_, User> {
    pub async fn keys(&self) -> Result<Keys> {
        self.invoke::<KeysAction>(()).await
    }

    pub async fn send_message(&self, contents: &str) -> Result<Message> {
        self.invoke::<SendMessage>(contents.to_owned()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::offline_utils;
    use crate::crypto::Cryptography;
    use crate::store::Store;
    use crate::storage::{Backend, MemoryBackend};
    use std::sync::Arc;

    fn store(backend: Arc<MemoryBackend>) -> Store {
        Store::builder(offline_utils())
            .backend(backend)
            .resources(crate::resources::all())
            .build()
            .unwrap()
    }

    fn roysom() -> User {
        User {
            id: Some(RecordId::new("1")),
            username: Some("roysom".into()),
            private_key: Some("sealed-private-key".into()),
            public_key: Some("pem".into()),
            info: None,
        }
    }

    #[test]
    fn private_key_is_encrypted_at_rest_while_logged_in() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(backend.clone());
        store.session().write().set("roysom", "bananas");

        store.save(&roysom()).unwrap();

        let persisted = backend.get_item("User").unwrap().unwrap();
        assert!(!persisted.contains("sealed-private-key"));

        let loaded: User = store.get(&RecordId::new("1")).unwrap();
        assert_eq!(loaded, roysom());
    }

    #[test]
    fn private_key_is_stored_as_is_without_master_key() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(backend.clone());

        store.save(&roysom()).unwrap();

        let persisted = backend.get_item("User").unwrap().unwrap();
        assert!(persisted.contains("sealed-private-key"));
    }

    #[test]
    fn loading_under_another_master_key_fails() {
        let store = store(Arc::new(MemoryBackend::new()));
        store.session().write().set("roysom", "bananas");
        store.save(&roysom()).unwrap();

        store.session().write().set("roysom", "apples");
        assert!(matches!(
            store.get::<User>(&RecordId::new("1")),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn query_by_username_returns_decrypted_record() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(backend.clone());
        store.session().write().set("roysom", "bananas");
        store.save(&roysom()).unwrap();

        let found = store
            .query::<User>(|u| u.username.as_deref() == Some("roysom"))
            .unwrap();
        assert_eq!(found, vec![roysom()]);

        let found = store
            .find::<User>(|u| u.username.as_deref() == Some("roysom"))
            .unwrap();
        assert_eq!(found, Some(roysom()));
        assert!(!backend.get_item("User").unwrap().unwrap().contains("sealed-private-key"));
    }

    #[test]
    fn records_of_other_accounts_survive_a_session_switch() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(backend.clone());
        store.session().write().set("roysom", "bananas");
        store.save(&roysom()).unwrap();

        let chernima = User {
            id: Some(RecordId::new("2")),
            username: Some("chernima".into()),
            private_key: Some("chernima-sealed-key".into()),
            public_key: Some("pem".into()),
            info: None,
        };
        store.session().write().set("chernima", "apples");
        store.save(&chernima).unwrap();

        let everyone = store.query::<User>(|_| true).unwrap();
        assert_eq!(everyone.len(), 2);
        assert_eq!(everyone[1], chernima);
        assert_ne!(everyone[0].private_key, roysom().private_key);

        store.session().write().set("roysom", "bananas");
        let loaded: User = store.get(&RecordId::new("1")).unwrap();
        assert_eq!(loaded, roysom());
        assert!(!backend.get_item("User").unwrap().unwrap().contains("chernima-sealed-key"));
    }

    #[test]
    fn tag_split_requires_full_width() {
        let tag = "A".repeat(HMAC_B64_LEN);
        let stored = format!("body{tag}");
        assert_eq!(split_tag(&stored).unwrap(), ("body", tag.as_str()));

        assert!(matches!(split_tag("short"), Err(Error::DataIntegrity(_))));
    }

    #[tokio::test]
    async fn keys_of_others_have_no_private_half() {
        let crypto = Cryptography::new(1024);
        let pair = crypto.generate_key_pair().await.unwrap();
        let exported = crypto.export_keys(Some(&pair.private_key), Some(&pair.public_key));

        let store = store(Arc::new(MemoryBackend::new()));
        store.session().write().set("roysom", "bananas");

        let chernima = User {
            id: Some(RecordId::new("2")),
            username: Some("chernima".into()),
            private_key: exported.private_key.as_deref().cloned(),
            public_key: exported.public_key.clone(),
            info: None,
        };

        let keys = store.bind(chernima).keys().await.unwrap();
        assert!(keys.private_key.is_none());
        assert_eq!(keys.public_key, Some(pair.public_key));
    }

    #[tokio::test]
    async fn logout_clears_the_session() {
        let store = store(Arc::new(MemoryBackend::new()));
        store.session().write().set("roysom", "bananas");

        store.class::<User>().logout().await.unwrap();

        assert!(!store.session().read().is_logged_in());
        assert_eq!(store.session().read().master_key(), None);
    }

    #[tokio::test]
    async fn login_failure_restores_previous_session() {
        let store = store(Arc::new(MemoryBackend::new()));

        let result = store.class::<User>().login("roysom", "bananas").await;

        assert!(matches!(result, Err(Error::Transport { status: None, .. })));
        assert_eq!(store.session().read().username(), None);
        assert_eq!(store.session().read().master_key(), None);
    }
}
