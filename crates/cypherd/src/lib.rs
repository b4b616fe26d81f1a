//! CYPHER daemon library - exposes modules for testing.

pub mod chat;
pub mod routes;
pub mod server;
