//! Storage manager internals
//!
//! [`crate::StorageManager`] composes [`container::ContainerEngine`] and
//! [`lifecycle::ObjectManager`]; everything else here is a building block of
//! those two.

pub mod array;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod iterator;
pub mod lifecycle;
pub mod metadata;
pub mod node;
pub mod schema;
