//! Catalog services built on the query cache.

pub mod browse;
pub mod catalog;
pub mod error;
pub mod pagination;
pub mod patches;
pub mod search;
pub mod validation;
