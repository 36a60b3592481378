// src/watch/mod.rs

//! Watch manager and event dispatch.
//!
//! This module is responsible for:
//! - Tracking active watch entries of a context ([`table`]).
//! - Routing raw change records to entries by scope and filter, collapsing
//!   overflows to one per root ([`table`]).
//! - Invoking callbacks on the event loop ([`dispatch`]).
//!
//! It does **not** know how changes are detected; backends feed it raw
//! records through [`Dispatcher::dispatch_batch`].

pub mod dispatch;
pub mod path_utils;
pub mod table;

pub use dispatch::Dispatcher;
pub use table::{Callback, Delivery, RawChange, WatchEntry, WatchHandle, WatchTable};
