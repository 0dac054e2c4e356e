//! Repository layer — all query logic lives here.

pub mod contact;
pub mod credential;
pub mod message;
pub mod sync_state;
pub mod user;

pub use contact::ContactRepository;
pub use credential::{CredentialRepository, CredentialUpsert};
pub use message::{FeedFilter, FeedPage, MessagePatch, MessageRepository};
pub use sync_state::SyncStateRepository;
pub use user::UserRepository;
