//! Wire-level session management
//!
//! This module handles:
//! * Transport abstraction (TCP, TLS over TCP, Unix socket)
//! * Session lifecycle (startup, auth, simple queries, termination)
//! * Session state machine enforcement
//! * TLS profiles built from CA and client certificate files

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, SessionParams};
pub use state::SessionState;
pub use tls::{parse_server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
