//! Messages and the inbox actions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::action::{Capability, ClassAction, Context, ModelClass};
use crate::api::Request;
use crate::error::{Error, Result};
use crate::model::{self, Model, RecordId};
use crate::resource::Resource;
use crate::resources::user::User;

/// A message between two users. `contents` is plaintext once stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    pub id: Option<RecordId>,
    pub from_user: Option<String>,
    pub to_user: Option<String>,
    pub contents: Option<String>,
    /// Milliseconds since the epoch once stored; seconds on the wire.
    pub sent_at: Option<f64>,
}

impl Model for Message {
    const NAME: &'static str = "Message";
    const FIELDS: &'static [&'static str] = &["fromUser", "toUser", "contents", "sentAt"];

    fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }
}

impl Message {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
    }

    /// Converts a server timestamp in seconds to milliseconds.
    pub(crate) fn rescale_sent_at(&mut self) {
        if let Some(seconds) = self.sent_at {
            self.sent_at = Some(seconds * 1000.0);
        }
    }

    /// Whether this message was exchanged between `a` and `b`, either way.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        let (from, to) = (self.from_user.as_deref(), self.to_user.as_deref());
        (from == Some(a) && to == Some(b)) || (from == Some(b) && to == Some(a))
    }
}

pub fn resource() -> Resource {
    Resource::builder::<Message>()
        .class_action::<Poll>()
        .class_action::<History>()
        .finish()
}

/// Downloads, decrypts and stores pending messages.
///
/// Returns whether at least one new message was stored. A message that
/// cannot be processed is logged and skipped; already stored ids are not
/// processed again.
pub struct Poll;

#[async_trait]
impl ClassAction<Message> for Poll {
    const NAME: &'static str = "poll";
    const REQUIREMENTS: &'static [Capability] =
        &[Capability::Utils, Capability::Session, Capability::Resources];

    type Args = bool;
    type Output = bool;

    async fn call(cx: &Context<'_>, clear_history: bool) -> Result<bool> {
        let credentials = cx.credentials()?;
        let request = Request::get("/messages").credentials(credentials.clone());
        let response = cx.utils().api.request(request).await?;

        let query_time = response.get("queryTime").filter(|t| !t.is_null()).cloned();
        let fetched = match response.get("messages") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        if fetched.is_empty() {
            debug!("no pending messages");
            return Ok(false);
        }

        let me = cx.class::<User>().me().await?;
        let own_key = me
            .keys()
            .await?
            .private_key
            .ok_or_else(|| Error::InvalidKey("own private key is unavailable".into()))?;

        let mut stored = 0usize;
        for item in &fetched {
            match receive(cx, &own_key, item).await {
                Ok(true) => stored += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "dropping message that could not be processed"),
            }
        }

        match (clear_history, query_time) {
            (true, Some(until)) => {
                let request = Request::delete("/messages")
                    .credentials(credentials)
                    .param("until", until);
                cx.utils().api.request(request).await?;
            }
            (true, None) => warn!("poll response has no queryTime, server history kept"),
            (false, _) => {}
        }

        info!(fetched = fetched.len(), stored, "poll finished");
        Ok(stored > 0)
    }
}

async fn receive(cx: &Context<'_>, own_key: &RsaPrivateKey, item: &Value) -> Result<bool> {
    let mut message: Message = model::import(item)?;
    if let Some(id) = &message.id {
        if cx.store().contains::<Message>(id)? {
            debug!(%id, "message already stored");
            return Ok(false);
        }
    }

    let sender_name = message.from_user.clone().unwrap_or_default();
    let sender = cx.class::<User>().get_by_username(&sender_name).await?;
    let sender_key = sender
        .keys()
        .await?
        .public_key
        .ok_or_else(|| Error::InvalidKey(format!("{sender_name} has no usable public key")))?;

    let envelope = message.contents.take().unwrap_or_default();
    let plaintext = cx
        .utils()
        .cryptography
        .decrypt_asym(own_key, &sender_key, &envelope)?;
    message.contents = Some(plaintext);
    message.rescale_sent_at();

    cx.store().save(&message)?;
    Ok(true)
}

/// Stored messages between the logged-in user and another user, oldest
/// first.
pub struct History;

#[async_trait]
impl ClassAction<Message> for History {
    const NAME: &'static str = "history";
    const REQUIREMENTS: &'static [Capability] = &[Capability::Session];

    type Args = String;
    type Output = Vec<Message>;

    async fn call(cx: &Context<'_>, with_username: String) -> Result<Vec<Message>> {
        let me = cx.username().ok_or(Error::NotAuthenticated)?;
        let mut messages = cx
            .store()
            .query::<Message>(|m| m.is_between(&me, &with_username))?;
        messages.sort_by(|a, b| {
            let (a, b) = (a.sent_at.unwrap_or(0.0), b.sent_at.unwrap_or(0.0));
            a.total_cmp(&b)
        });
        Ok(messages)
    }
}

impl ModelClass<'_, Message> {
    pub async fn poll(&self, clear_history: bool) -> Result<bool> {
        self.invoke::<Poll>(clear_history).await
    }

    pub async fn history(&self, with_username: &str) -> Result<Vec<Message>> {
        self.invoke::<History>(with_username.to_owned()).await
    }
}
