mod admin;
mod chat;
mod file;

pub use admin::*;
pub use chat::*;
pub use file::*;
