//! Gauge helpers

use metrics::gauge;

/// 1 while a connection is installed, 0 otherwise
pub fn connection_up(up: bool) {
    gauge!("pgkeeper_connection_up").set(if up { 1.0 } else { 0.0 });
}

/// Number of transaction tools in the registry
pub fn registry_size(size: usize) {
    gauge!("pgkeeper_registry_tools").set(size as f64);
}
