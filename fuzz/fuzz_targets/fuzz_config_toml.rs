//! Fuzz target for TOML configuration parsing.
//!
//! Arbitrary text must either fail to parse or produce a config whose
//! floors hold; it must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use worklane::config;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(cfg) = config::from_toml_str(text) {
        assert!(cfg.queue_capacity >= 1);
        assert!(cfg.background_capacity() >= 1);
        assert!(cfg.batch_size >= 1);
        assert!(cfg.throttle_rate >= 1);
        let _ = cfg.validate();
        let _ = cfg.effective_config().entries();
    }
});
