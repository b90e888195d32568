pub mod blob;
pub mod repository;
pub mod retry;
pub mod sqlite;
