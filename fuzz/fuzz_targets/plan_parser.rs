#![no_main]

use hookline::config::HookPlan;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing and validating must never panic
        if let Ok(plan) = HookPlan::from_toml_str(input) {
            let _ = plan.validate();
        }
    }
});
