//! kiln: a static-site asset pipeline.
//!
//! Build work is described as [`core::Task`] values composed into sequential
//! and parallel [`core::Node`] graphs, executed by
//! [`orchestration::Runner`]. [`orchestration::Pipeline`] provides the named
//! tasks (clean, styles, html, images, webp, sprite, copy, server, reload,
//! watcher) and the `build` and `develop` graphs built from them.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod server;
pub mod tasks;
pub mod util;

pub use error::{Error, Result};
