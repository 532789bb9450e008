//! Catalog client built around a query cache with request deduplication,
//! tag invalidation and optimistic mutations.

pub mod api;
pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
