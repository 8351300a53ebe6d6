//! Republishes the latest motion clip of each cloud camera as a looping
//! RTSP stream.

pub mod api;
pub mod app;
pub mod config;
pub mod credentials;
pub mod markers;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod preparer;
pub mod publisher;
pub mod retry;
pub mod status;
pub mod storage;
pub mod vendor;

pub use config::Config;
pub use orchestrator::{CameraTask, Orchestrator, TickReport};
