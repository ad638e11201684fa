// svc-probe - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod poll;
pub mod shapes;

pub use error::{ProbeError, Result};
