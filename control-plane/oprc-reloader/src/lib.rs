pub mod admission;
pub mod annotations;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod quarantine;
pub mod references;
pub mod runtime;
pub mod source;
pub mod store;
pub mod watch_index;
pub mod web;
pub mod workload;

pub use error::{Error, MissingChildren};

use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

pub fn init_tracing(default_env: &str) {
    let filter = EnvFilter::builder()
        .with_env_var("RUST_LOG")
        .from_env_lossy()
        .add_directive(
            default_env
                .parse()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        );

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
