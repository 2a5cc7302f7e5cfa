//! Utilities shared by the database driver.
//!
//! - [`tls`]: rustls connector construction from `ssl_mode`

pub mod tls;

pub use tls::{SslMode, TlsBuilder};
