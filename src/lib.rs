pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod ecosystem;
pub mod enforcement;
pub mod errors;
pub mod gates;
pub mod init;
pub mod phase;
pub mod resume;
pub mod settings;
pub mod store;
pub mod subprocess;
pub mod task;
pub mod tracker;
pub mod util;
