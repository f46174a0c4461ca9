//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use crate::protocol::types::*;

/// Serialise a single-answer response: `header` (with its ANCOUNT
/// incremented), then `question`, then `answer` with its name
/// written as a pointer to the question name.
///
/// Each call uses its own compression table, so any number of
/// answers for one datagram can be built concurrently.
///
/// # Errors
///
/// If ANCOUNT overflows or the RDATA is too long.
pub fn build_answer(
    header: &mut WireHeader,
    question: &Question,
    answer: &ResourceRecord,
) -> Result<BytesMut, Error> {
    header.ancount = usize_to_u16(usize::from(header.ancount) + 1)?;

    let mut buffer = WritableBuffer::default();
    header.serialise(&mut buffer);
    question.serialise(&mut buffer);

    question.name.serialise(&mut buffer, true);
    answer.rtype.serialise(&mut buffer);
    answer.rclass.serialise(&mut buffer);
    buffer.write_u32(answer.ttl);
    buffer.write_u16(usize_to_u16(answer.rdata.len())?);
    buffer.write_octets(&answer.rdata);

    Ok(buffer.octets)
}

impl WireHeader {
    pub fn to_octets(&self) -> BytesMut {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer);
        buffer.octets
    }

    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        buffer.write_u16(self.header.id);
        buffer.write_u16(self.header.flags());
        buffer.write_u16(self.qdcount);
        buffer.write_u16(self.ancount);
        buffer.write_u16(self.nscount);
        buffer.write_u16(self.arcount);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        self.name.serialise(buffer, true);
        self.qtype.serialise(buffer);
        self.qclass.serialise(buffer);
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let rdlength = usize_to_u16(self.rdata.len())?;

        self.name.serialise(buffer, true);
        self.rtype.serialise(buffer);
        self.rclass.serialise(buffer);
        buffer.write_u32(self.ttl);
        buffer.write_u16(rdlength);
        buffer.write_octets(&self.rdata);

        Ok(())
    }
}

impl DomainName {
    pub fn serialise(&self, buffer: &mut WritableBuffer, compress: bool) {
        if compress {
            let index = buffer.index();
            let encoded = buffer.names.encode(self, index);
            buffer.write_octets(&encoded);
        } else {
            buffer.write_octets(&self.to_uncompressed_octets());
        }
    }

    /// The labels, each prefixed with its length, then the zero
    /// terminator.
    pub fn to_uncompressed_octets(&self) -> Vec<u8> {
        let mut octets = Vec::with_capacity(self.len);
        for label in &self.labels {
            octets.push(label.len());
            octets.extend_from_slice(label.octets());
        }
        octets.push(0);
        octets
    }
}

impl QueryType {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        buffer.write_u16(self.into());
    }
}

impl QueryClass {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        buffer.write_u16(self.into());
    }
}

impl RecordType {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        buffer.write_u16(self.into());
    }
}

impl RecordClass {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        buffer.write_u16(self.into());
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Where each name has been written in one message, so that later
/// occurrences can be replaced with a pointer.
#[derive(Debug, Clone, Default)]
pub struct CompressionTable {
    names: HashMap<DomainName, NameEntry>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct NameEntry {
    offset: usize,
    reuses: usize,
}

impl CompressionTable {
    /// Record that `name` is written at `offset`.  The first
    /// registration of a name wins.
    pub fn register(&mut self, name: &DomainName, offset: usize) {
        if !self.names.contains_key(name) {
            self.names
                .insert(name.clone(), NameEntry { offset, reuses: 0 });
        }
    }

    /// Encode `name` for writing at `current_offset`: a pointer if it
    /// has been written earlier in the message, otherwise the full
    /// labels (and the name is registered at `current_offset`).
    ///
    /// The root name is always a single zero octet.
    pub fn encode(&mut self, name: &DomainName, current_offset: usize) -> Vec<u8> {
        if name.is_root() {
            return vec![0];
        }

        if let Some(entry) = self.names.get_mut(name) {
            let pointer = u16::try_from(entry.offset)
                .ok()
                .filter(|offset| usize::from(*offset) <= POINTER_MAX_OFFSET);
            if let Some(offset) = pointer.filter(|_| entry.offset < current_offset) {
                entry.reuses += 1;
                let [hi, lo] = offset.to_be_bytes();
                return vec![hi | POINTER_TAG, lo];
            }
        }

        self.register(name, current_offset);
        name.to_uncompressed_octets()
    }

    pub fn offset_of(&self, name: &DomainName) -> Option<usize> {
        self.names.get(name).map(|entry| entry.offset)
    }

    /// How many times a pointer to `name` has been emitted.
    pub fn reuses_of(&self, name: &DomainName) -> Option<usize> {
        self.names.get(name).map(|entry| entry.reuses)
    }
}

/// A buffer which can be written to, for serialisation purposes.
pub struct WritableBuffer {
    pub octets: BytesMut,
    pub names: CompressionTable,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: BytesMut::with_capacity(UDP_MESSAGE_SIZE),
            names: CompressionTable::default(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.put_u8(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_octets(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_octets(&value.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.put_slice(octets);
    }
}

/// Helper function to convert a `usize` into a `u16` (or return an error).
///
/// # Errors
///
/// If the value cannot be converted.
fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    if let Ok(t) = u16::try_from(counter) {
        Ok(t)
    } else {
        Err(Error::CounterTooLarge {
            counter,
            bits: u16::BITS,
        })
    }
}
