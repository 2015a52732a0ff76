pub mod blobs;
pub mod chat;
pub mod db;
pub mod error;
pub mod files;
pub mod tg_users;

pub use blobs::{ImageBlob, ImageBlobStore};
pub use chat::{Chat, ChatMessage, ChatStore, UsageEntry};
pub use error::{Result, StoreError};
pub use files::FileStore;
pub use tg_users::TelegramUserMap;
