#![no_main]
use libfuzzer_sys::fuzz_target;

use dns_types::protocol::serialise::WritableBuffer;
use dns_types::protocol::types::{Question, WireHeader};

fuzz_target!(|data: &[u8]| {
    let Ok(wire_header) = WireHeader::from_octets(data) else {
        return;
    };
    let id = wire_header.header.id;
    let Ok(questions) = Question::from_octets(id, data, wire_header.qdcount) else {
        return;
    };

    let mut buffer = WritableBuffer::default();
    wire_header.serialise(&mut buffer);
    for question in &questions {
        question.serialise(&mut buffer);
    }

    assert_eq!(Ok(wire_header), WireHeader::from_octets(&buffer.octets));
    assert_eq!(
        Ok(questions),
        Question::from_octets(id, &buffer.octets, wire_header.qdcount)
    );
});
