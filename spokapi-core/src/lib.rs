pub mod browser;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod tab_pool;
pub mod timewindow;
pub mod tracing_ext;
pub mod watch;
