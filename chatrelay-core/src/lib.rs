pub mod config;
pub mod error;
pub mod handler;
pub mod http_client;
pub mod model;
pub mod platform;
pub mod provider;
pub mod providers;
pub mod stream;
pub mod telemetry;
pub mod tools;
pub mod web_search;
#[cfg(test)]
pub mod test_util;

pub use handler::{HandlerOptions, HandlerParts, Phase, StreamResponseHandler};
