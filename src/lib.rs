//! Client-side query cache and cursor pagination for document databases.

pub mod cache;
pub mod config;
pub mod docstore;
pub mod pagination;
pub mod query;
