//! Auto-reply server for Facebook Messenger and Instagram page conversations.

pub mod ai;
pub mod app;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod live;
pub mod media;
pub mod normalize;
pub mod pipeline;
pub mod platform;
pub mod policy;
pub mod prompting;
pub mod retry;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;
