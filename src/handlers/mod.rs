pub mod admin;
pub mod blob;
pub mod file;
pub mod folder;
pub mod user;
