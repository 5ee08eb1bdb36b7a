//! Junction server: HTTP surface and SQLite persistence around the core
//! submission pipeline.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
