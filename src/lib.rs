//! Creative Engine
//!
//! Asynchronous core of a Meta Ads creative generator: a durable job
//! queue, a bounded worker pool running the generation pipeline (site
//! analysis, AI copy and image generation, composition, multi-format
//! render) and a per-job progress channel exposed over WebSocket.

pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
