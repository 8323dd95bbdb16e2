pub mod blob_store;
pub mod key_locks;
pub mod multipart;
pub mod object_store;
