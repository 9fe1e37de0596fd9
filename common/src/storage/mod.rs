pub mod db;
pub mod memory;
pub mod store;
pub mod surreal;
pub mod types;
