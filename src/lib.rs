mod annotation;
mod classification;
mod codec;
mod detection;
mod pipeline;
mod routes;
mod server;
mod session;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
