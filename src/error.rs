use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Network failure or a non-2xx response. `status` is `None` when the
    /// request never produced a response.
    #[error("request failed ({}): {message}", status_label(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("fatal data integrity error: {0}")]
    DataIntegrity(String),

    #[error("record not found (model: {model}, id: {id})")]
    RecordNotFound { model: String, id: String },

    #[error("action \"{action}\" requires augmentation \"{capability}\", which does not exist")]
    CapabilityMissing { action: String, capability: String },

    #[error("multiple declarations: member \"{member}\" already exists in {target}")]
    DuplicateMember { member: String, target: String },

    #[error("action \"{action}\" is not attached to model {model}")]
    ActionNotAttached { action: String, model: String },

    #[error("model {0} is not registered with the store")]
    UnknownModel(String),

    #[error("cannot save {0} record without a server-assigned id")]
    MissingIdentifier(String),

    #[error("not authenticated: master key not set")]
    NotAuthenticated,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("repeating task {0}")]
    TaskState(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Transport {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by a transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "local".to_string(),
    }
}
