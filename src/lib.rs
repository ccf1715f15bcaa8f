//! Translation between flat genome annotation files and a Chado store.
//!
//! Import runs `file -> parser -> records -> graph builder -> loader -> store`
//! inside one transaction per import unit. Export reverses it:
//! `store -> exporter -> records -> serializer -> file`.

pub mod config;
pub mod db;
pub mod error;
pub mod exporter;
pub mod formats;
pub mod graph;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod resolver;

pub use error::{ChadoError, Result};
