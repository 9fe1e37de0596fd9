pub mod config;
pub mod embedding;
pub mod generation;
pub mod retry;
pub mod text;
