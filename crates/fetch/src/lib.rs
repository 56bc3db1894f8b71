//! Retrieval of rendered pages.
//!
//! [`Fetcher`] turns crawl URLs into [`Fetched`] pages, either one request at
//! a time or in batches of [`BATCH_SIZE`] spread over [`WORKERS`] concurrent
//! requests. The cache is consulted before any network I/O. Every URL fails
//! on its own: a non-200 status, an empty body or a transport error is
//! returned for that URL and never aborts the batch.
//!
//! Renderers may report the entity a page represents and the entities it
//! read through the [`ENTITY_HEADER`] and [`DEPENDENCIES_HEADER`] response
//! headers; both are surfaced on [`Fetched`] for the cache to record.

pub mod error;
mod fetcher;

pub use crate::fetcher::{
    BATCH_SIZE, CONCURRENT_TIMEOUT, DEPENDENCIES_HEADER, ENTITY_HEADER, Fetched, Fetcher, USER_AGENT, WORKERS,
};
