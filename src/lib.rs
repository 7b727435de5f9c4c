//! Offline-first caching and sync for the Synka web app.
//!
//! The worker side intercepts requests and serves them from versioned cache
//! partitions; the host side queues mutations and keeps read snapshots for
//! when the network is gone.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod event;
pub mod logging;
pub mod net;
pub mod offline;
pub mod worker;
