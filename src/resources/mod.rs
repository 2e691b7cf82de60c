//! The messaging resources: users and messages.

pub mod message;
pub mod user;

pub use message::Message;
pub use user::User;

use crate::resource::Resource;

pub fn all() -> Vec<Resource> {
    vec![user::resource(), message::resource()]
}
