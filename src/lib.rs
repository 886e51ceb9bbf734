//! Bizdiag, a business diagnostic assistant.
//!
//! Owner messages arrive from Telegram, get classified by an LLM, are stored
//! in libSQL and aggregated into daily and long-window reports.

pub mod bot;
pub mod channels;
pub mod classify;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod reports;
pub mod scheduler;
pub mod server;
pub mod store;
