pub mod cluster;
pub mod config;
pub mod disk;
pub mod osd;
