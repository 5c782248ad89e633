//! Shared setup: one interpreter per test binary, started on first use.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use pyhost::BridgeConfig;

pub const MODULE: &str = "outliers";

static START: Once = Once::new();
static SERIAL: Mutex<()> = Mutex::new(());

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

pub fn ensure_started() {
    START.call_once(|| {
        pyhost::logging::init(tracing::Level::DEBUG);
        let config = BridgeConfig::default().with_search_path(fixtures_dir());
        pyhost::start(&config).expect("interpreter should start");
    });
}

/// Tests comparing `live_owned_handles()` before and after must not overlap
/// with other tests in the same binary.
pub fn serial() -> MutexGuard<'static, ()> {
    ensure_started();
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}
