//! Metastore implementations
//!
//! A metastore persists wrapped system and intermediate keys. This crate provides an
//! in-memory store; durable backends (SQL, DynamoDB, ...) implement
//! [`Metastore`](crate::Metastore) in the application.

pub mod memory;

pub use memory::InMemoryMetastore;
