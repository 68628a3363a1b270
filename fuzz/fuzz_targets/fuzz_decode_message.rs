#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pgkeeper::protocol::decode_message;

/// Backend bytes plus the points where the socket reads split them
#[derive(Debug)]
struct Segments {
    data: Vec<u8>,
    cuts: Vec<u8>,
}

impl<'a> Arbitrary<'a> for Segments {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            data: u.arbitrary()?,
            cuts: u.arbitrary()?,
        })
    }
}

fn drain(buf: &mut BytesMut) {
    while !buf.is_empty() {
        match decode_message(buf) {
            Ok((_, consumed)) if consumed > 0 => buf.advance(consumed),
            _ => break,
        }
    }
}

fuzz_target!(|input: Segments| {
    let mut cuts: Vec<usize> = input
        .cuts
        .iter()
        .map(|&b| b as usize % (input.data.len() + 1))
        .chain([0, input.data.len()])
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut buf = BytesMut::new();
    for pair in cuts.windows(2) {
        buf.extend_from_slice(&input.data[pair[0]..pair[1]]);
        drain(&mut buf);
    }
});
