pub mod actors;
pub mod backend;
pub mod config;
pub mod metric;
pub mod probes;
pub mod util;
