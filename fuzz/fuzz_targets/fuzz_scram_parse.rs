#![no_main]

use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pgkeeper::auth::ScramSha256;

#[derive(Debug)]
struct Exchange {
    password: String,
    server_first: String,
    server_final: String,
}

impl<'a> Arbitrary<'a> for Exchange {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            password: u.arbitrary()?,
            server_first: u.arbitrary()?,
            server_final: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: Exchange| {
    let mut scram = ScramSha256::new(&input.password);
    let _ = scram.client_first();
    if scram.client_final(&input.server_first).is_ok() {
        let _ = scram.verify_server_final(&input.server_final);
    }
});
