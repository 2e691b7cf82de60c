//! Typed records and their stored JSON form.

use std::fmt;

use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::augment::Augmentations;
use crate::error::Result;

/// Server-assigned record identifier.
///
/// The server sends ids as either JSON numbers or strings; both normalise to
/// the same string form, which is also the key in the store's tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = RecordId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer record id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RecordId, E> {
                Ok(RecordId::new(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<RecordId, E> {
                Ok(RecordId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RecordId, E> {
                Ok(RecordId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RecordId, E> {
                Ok(RecordId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// A persistent record type.
///
/// `NAME` keys the model's table in the store and in the backend. `FIELDS`
/// lists the stored field names besides `id`, in the client's camelCase
/// convention; the serde representation must use the same names.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const NAME: &'static str;
    const FIELDS: &'static [&'static str];

    fn id(&self) -> Option<&RecordId>;

    /// Runs on a clone just before the record is written to the store.
    fn on_save(&mut self, _augmentations: &Augmentations) -> Result<()> {
        Ok(())
    }

    /// Runs after a stored record is read back.
    fn on_load(&mut self, _augmentations: &Augmentations) -> Result<()> {
        Ok(())
    }
}

/// Stored form of a record: `id` followed by the declared fields, in order.
/// Undeclared fields are dropped and missing ones become `null`.
pub fn export<M: Model>(record: &M) -> Result<Map<String, Value>> {
    let value = serde_json::to_value(record)?;
    Ok(project::<M>(&value))
}

/// Builds a record from any JSON object, keeping only the declared fields.
pub fn import<M: Model>(value: &Value) -> Result<M> {
    if !value.is_object() {
        let err = <serde_json::Error as de::Error>::invalid_type(
            de::Unexpected::Other("non-object value"),
            &M::NAME,
        );
        return Err(err.into());
    }
    Ok(serde_json::from_value(Value::Object(project::<M>(value)))?)
}

fn project<M: Model>(value: &Value) -> Map<String, Value> {
    std::iter::once("id")
        .chain(M::FIELDS.iter().copied())
        .map(|field| {
            let v = value.get(field).cloned().unwrap_or(Value::Null);
            (field.to_string(), v)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Note {
        pub id: Option<RecordId>,
        pub title: Option<String>,
        pub body_text: Option<String>,
    }

    impl Model for Note {
        const NAME: &'static str = "Note";
        const FIELDS: &'static [&'static str] = &["title", "bodyText"];

        fn id(&self) -> Option<&RecordId> {
            self.id.as_ref()
        }
    }

    impl Note {
        pub(crate) fn new(id: &str, title: &str) -> Self {
            Self {
                id: Some(id.into()),
                title: Some(title.into()),
                body_text: None,
            }
        }
    }

    #[test]
    fn ids_normalise_from_numbers_and_strings() {
        let a: RecordId = serde_json::from_value(json!(17)).unwrap();
        let b: RecordId = serde_json::from_value(json!("17")).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_value(&a).unwrap(), json!("17"));
    }

    #[test]
    fn fractional_ids_are_rejected() {
        assert!(serde_json::from_value::<RecordId>(json!(1.5)).is_err());
    }

    #[test]
    fn export_keeps_declared_fields_in_order() {
        let exported = export(&Note::new("1", "groceries")).unwrap();

        let keys: Vec<_> = exported.keys().map(String::as_str).collect();
        assert_eq!(keys, ["id", "title", "bodyText"]);
        assert_eq!(exported["bodyText"], Value::Null);
    }

    #[test]
    fn import_drops_unknown_and_nulls_missing() {
        let note: Note = import(&json!({"id": 3, "title": "t", "colour": "red"})).unwrap();

        assert_eq!(note.id, Some(RecordId::new("3")));
        assert_eq!(note.title.as_deref(), Some("t"));
        assert_eq!(note.body_text, None);
    }

    #[test]
    fn import_rejects_non_objects() {
        assert!(import::<Note>(&json!([1, 2])).is_err());
        assert!(import::<Note>(&Value::Null).is_err());
    }
}
