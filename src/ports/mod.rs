//! Port traits at the boundary of the analytics core.

pub mod bar_port;
pub mod config_port;
pub mod store_port;
