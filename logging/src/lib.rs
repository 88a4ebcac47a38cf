//! Process-wide logger setup.
//!
//! Hosted equivalent of the teacher's `no_std` `SimpleLogger`/`LogIf`
//! pair: there is a real stderr and a real `RUST_LOG` environment variable
//! here, so `env_logger` replaces the hand-rolled `Log` impl and
//! `crate_interface` indirection outright.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the global logger. Safe to call more than once; only the first
/// call takes effect. Level filter comes from `RUST_LOG`, defaulting to
/// `info` when unset.
pub fn init() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .init();
    });
}
