pub mod archive;
pub mod catalog;
pub mod chart;
pub mod config;
pub mod dom;
pub mod extract;
pub mod media;
pub mod melody;
pub mod timeline;

/// Application name for XDG paths
pub const APP_NAME: &str = "ssrip";
