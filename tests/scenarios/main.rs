//! End-to-end scheduler scenarios against an in-memory store


mod cancellation;
mod concurrency;
mod failure_handling;
mod retry_behavior;
#[cfg(feature = "sqlite")]
mod sqlite_store;
mod success_chain;
