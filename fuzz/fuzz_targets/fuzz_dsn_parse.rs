#![no_main]

use libfuzzer_sys::fuzz_target;
use pgkeeper::driver::ConnectionInfo;

fuzz_target!(|data: &[u8]| {
    if let Ok(dsn) = std::str::from_utf8(data) {
        if let Ok(info) = ConnectionInfo::parse(dsn) {
            let _ = info.session_params();
        }
    }
});
