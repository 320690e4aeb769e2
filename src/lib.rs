// Core relay
pub mod connection_manager;
pub mod events;
pub mod overlay;
pub mod relay;
pub mod shutdown;

// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;
