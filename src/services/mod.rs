pub mod auth;
pub mod blob;
pub mod file;
pub mod folder;
pub mod hasher;
pub mod quota;
pub mod user;

pub use auth::AuthService;
pub use blob::BlobCatalog;
pub use file::FileService;
pub use folder::FolderService;
pub use hasher::{ChunkSource, ContentHasher, HashedContent};
pub use quota::QuotaAccountant;
pub use user::UserService;
