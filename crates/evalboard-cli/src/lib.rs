//! Terminal front end for the evalboard dashboard.
//!
//! `evalboard run` streams a live evaluation, the history commands browse
//! persisted runs, and `evalboard replay` feeds recorded frames through the
//! same session offline.

pub mod app;
pub mod args;
pub mod driver;
pub mod http;
pub mod logging;
pub mod render;
pub mod replay;
pub mod ws;

pub use app::{EXIT_USAGE, run_cli};
