#![no_main]

use libfuzzer_sys::fuzz_target;
use mbus_master::mbus::frame::{pack_frame, parse_frame};
use mbus_master::Telegram;

fuzz_target!(|data: &[u8]| {
    // Any input must decode or fail without panicking
    if let Ok(frame) = parse_frame(data) {
        // A frame that decodes re-encodes to the same bytes
        assert_eq!(pack_frame(&frame), data);
    }
    let _ = Telegram::decode(data);

    if data.first() == Some(&0x68) && data.len() >= 6 {
        let mut mutated = data.to_vec();
        mutated[1] = (data.len() as u8).wrapping_sub(6);
        mutated[2] = mutated[1];
        let _ = parse_frame(&mutated);
    }
});
