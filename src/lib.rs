pub mod apis;
pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod extract;
pub mod infra;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;
