//! Mailroom — email intake daemon: poll, classify, route, persist.

pub mod classify;
pub mod config;
pub mod daemon;
pub mod error;
pub mod handlers;
pub mod intent;
pub mod lock;
pub mod mailer;
pub mod message;
pub mod ops;
pub mod pipeline;
pub mod storage;
pub mod store;
