//! Centralized constants for the castle project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod osd;
pub mod paths;
pub mod state;
