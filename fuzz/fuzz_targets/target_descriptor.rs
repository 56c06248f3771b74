#![no_main]

use hookline::target::TargetDescriptor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(target) = TargetDescriptor::parse(input) {
            assert!(!target.container_name().is_empty());
            assert!(!target.member_name().is_empty());
            assert_eq!(target.qualified_name(), input);
        }
    }
});
