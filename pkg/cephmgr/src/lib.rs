//! OSD agent: converges local disks into running OSD daemons.

pub mod agent;
pub mod applied;
pub mod bootstrap;
pub mod cluster;
pub mod context;
pub mod inventory;
pub mod keyring;
pub mod mon;
pub mod provision;

pub use agent::{OsdAgent, OsdAgentConfig};
pub use applied::{get_applied_osds, record_applied};
pub use context::Context;
