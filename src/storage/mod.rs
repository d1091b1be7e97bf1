pub mod cache;
pub mod codec;
pub mod file_info;
pub mod lock;
