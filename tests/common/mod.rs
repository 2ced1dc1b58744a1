//! Integration test common infrastructure.
//!
//! Provides a scripted line-oriented server with byte-level write control,
//! so tests can exercise framing across arbitrary read boundaries.

pub mod server;

#[allow(unused_imports)]
pub use server::{TestPeer, TestServer};

/// Install a test subscriber once; later calls are no-ops.
#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
