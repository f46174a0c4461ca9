use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::net::Ipv4Addr;

use bytes::Bytes;
use dns_types::protocol::deserialise::ConsumableBuffer;
use dns_types::protocol::serialise::{build_answer, WritableBuffer};
use dns_types::protocol::types::*;

#[allow(non_snake_case)]
fn bench__questions(c: &mut Criterion) {
    let mut buffer = WritableBuffer::default();
    let questions = [
        question("www.example.com."),
        question("mail.example.com."),
        question("www.example.com."),
    ];
    WireHeader {
        header: Header::from_flags(1234, HEADER_MASK_RD),
        qdcount: 3,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    }
    .serialise(&mut buffer);
    for q in &questions {
        q.serialise(&mut buffer);
    }
    let serialised = buffer.octets.freeze();

    c.bench_function("deserialise/header", |b| {
        b.iter(|| WireHeader::from_octets(black_box(&serialised)))
    });

    c.bench_function("deserialise/questions", |b| {
        b.iter(|| Question::from_octets(1234, black_box(&serialised), 3))
    });
}

#[allow(non_snake_case)]
fn bench__name__compressed(c: &mut Criterion) {
    let mut buffer = WritableBuffer::default();
    for i in 0..64 {
        domain(&format!("host-{i}.example.com.")).serialise(&mut buffer, true);
    }
    let offset = buffer.index();
    domain("host-63.example.com.").serialise(&mut buffer, true);
    let serialised = buffer.octets.freeze();

    c.bench_function("deserialise/name/compressed", |b| {
        b.iter(|| {
            DomainName::deserialise(
                0,
                &mut ConsumableBuffer::new(black_box(&serialised)).at_offset(offset),
            )
        })
    });
}

#[allow(non_snake_case)]
fn bench__answer(c: &mut Criterion) {
    let header = WireHeader {
        header: Header::from_flags(1234, HEADER_MASK_RD).make_response(),
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    let q = question("www.example.com.");
    let rr = ResourceRecord {
        name: domain("www.example.com."),
        rtype: RecordType::A,
        rclass: RecordClass::IN,
        ttl: 300,
        rdata: Bytes::copy_from_slice(&Ipv4Addr::new(1, 1, 1, 1).octets()),
    };

    c.bench_function("serialise/answer", |b| {
        b.iter(|| build_answer(&mut header.clone(), black_box(&q), black_box(&rr)))
    });
}

fn domain(name: &str) -> DomainName {
    DomainName::from_dotted_string(name).unwrap()
}

fn question(name: &str) -> Question {
    Question {
        name: domain(name),
        qtype: QueryType::Record(RecordType::A),
        qclass: QueryClass::Record(RecordClass::IN),
    }
}

criterion_group!(
    benches,
    bench__questions,
    bench__name__compressed,
    bench__answer,
);
criterion_main!(benches);
