//! Offline resilience subsystem for the field-sales app.
//!
//! Keeps the app usable with no connectivity: a request-interception layer
//! serves cached responses per request class, and a durable local queue
//! holds records created offline until a sync trigger replays them against
//! the server. Records are removed only after the server confirms success.
//!
//! The UI layer enqueues via [`store::DurableRecordStore`], the embedding
//! platform dispatches fetches through [`fetch::RequestInterceptor`], and
//! everything else is driven by the [`worker::Worker`] event loop.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod notify;
pub mod store;
pub mod sync;
pub mod worker;
