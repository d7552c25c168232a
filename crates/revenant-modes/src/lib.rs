//! Experimental modes for Revenant.
//!
//! A mode decides what an agent remembers, believes, and is told between
//! crashes. Every mode implements [`ExperimentMode`]; [`Mode`] bundles all
//! of them behind one type and [`ModeConfig`] selects one from a config
//! file.
//!
//! - [`mode`] -- the hook contract and shared helpers
//! - [`modes`] -- the nine conditions
//! - [`dispatch`] -- [`Mode`] and [`ModeConfig`]
//! - [`prompt`] -- pieces every system prompt is built from
//! - [`text`] -- message mutations and keyword scans

pub mod dispatch;
pub mod mode;
pub mod modes;
pub mod prompt;
pub mod text;

pub use dispatch::{Mode, ModeConfig};
pub use mode::ExperimentMode;
