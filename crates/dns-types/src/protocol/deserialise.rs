//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use std::collections::HashSet;

use crate::protocol::types::*;

impl WireHeader {
    /// Parse and validate the header of a message.
    ///
    /// # Errors
    ///
    /// If the header is too short, has no questions, or carries an
    /// rcode (or opcode) which means it cannot be served.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        let wire_header = Self::deserialise(&mut ConsumableBuffer::new(octets))?;
        wire_header.validate()?;
        Ok(wire_header)
    }

    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header::from_flags(id, flags),
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }

    /// # Errors
    ///
    /// If there are no questions, or the effective rcode is not
    /// `NoError`.
    pub fn validate(&self) -> Result<(), Error> {
        let id = self.header.id;

        if self.qdcount == 0 {
            return Err(Error::NoQuestions(id));
        }

        match self.header.effective_rcode() {
            Rcode::NoError => Ok(()),
            Rcode::FormatError => Err(Error::FormatError(id)),
            Rcode::ServerFailure => Err(Error::ServerFailure(id)),
            Rcode::NameError => Err(Error::NameError(id)),
            Rcode::NotImplemented => Err(Error::NotImplemented(id)),
            Rcode::Refused => Err(Error::Refused(id)),
            Rcode::Reserved(_) => Err(Error::UnsupportedOpcode(id)),
        }
    }
}

impl Question {
    /// Parse `qdcount` questions, starting immediately after the
    /// header.
    ///
    /// # Errors
    ///
    /// If any question cannot be parsed.
    pub fn from_octets(id: u16, octets: &[u8], qdcount: u16) -> Result<Vec<Self>, Error> {
        let mut buffer = ConsumableBuffer::new(octets).at_offset(HEADER_LEN);
        let mut questions = Vec::with_capacity(qdcount.into());

        for _ in 0..qdcount {
            questions.push(Self::deserialise(id, &mut buffer)?);
        }

        Ok(questions)
    }

    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = QueryType::deserialise(id, buffer)?;
        let qclass = QueryClass::deserialise(id, buffer)?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// The RDATA is taken as-is: names inside it are not expanded.
    ///
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = RecordType::deserialise(id, buffer)?;
        let rclass = RecordClass::deserialise(id, buffer)?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdata = buffer
            .take(rdlength.into())
            .ok_or(Error::ResourceRecordTooShort(id))?;

        Ok(Self {
            name,
            rtype,
            rclass,
            ttl,
            rdata: bytes::Bytes::copy_from_slice(rdata),
        })
    }
}

impl DomainName {
    /// Decode a possibly-compressed name.  Pointers may refer
    /// anywhere in the message, but following the same target twice
    /// is an error.
    ///
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut labels = Vec::<Label>::with_capacity(5);
        let mut visited = HashSet::new();

        read_labels(id, buffer, &mut visited, &mut labels, 1)?;

        DomainName::from_labels(labels).ok_or(Error::DomainTooLong(id))
    }
}

/// Append labels to `labels` until the terminator, following
/// pointers.  `len` is the encoded length of the name so far.
fn read_labels(
    id: u16,
    buffer: &mut ConsumableBuffer,
    visited: &mut HashSet<usize>,
    labels: &mut Vec<Label>,
    mut len: usize,
) -> Result<(), Error> {
    loop {
        let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

        if size == 0 {
            return Ok(());
        }

        if size & POINTER_TAG == POINTER_TAG {
            let hi = size & !POINTER_TAG;
            let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
            let ptr = usize::from(u16::from_be_bytes([hi, lo]));

            if !visited.insert(ptr) {
                return Err(Error::DomainPointerCycle(id));
            }

            return read_labels(id, &mut buffer.at_offset(ptr), visited, labels, len);
        }

        if usize::from(size) > LABEL_MAX_LEN {
            return Err(Error::DomainLabelInvalid(id));
        }

        let octets = buffer
            .take(size.into())
            .ok_or(Error::DomainTooShort(id))?;
        let label = Label::try_from(octets).map_err(|_| Error::DomainLabelInvalid(id))?;

        len += 1 + usize::from(size);
        if len > DOMAINNAME_MAX_LEN {
            return Err(Error::DomainTooLong(id));
        }

        labels.push(label);
    }
}

impl QueryType {
    /// # Errors
    ///
    /// If the query type is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;
        Ok(Self::from(value))
    }
}

impl QueryClass {
    /// # Errors
    ///
    /// If the query class is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;
        Ok(Self::from(value))
    }
}

impl RecordType {
    /// # Errors
    ///
    /// If the record type is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        Ok(Self::from(value))
    }
}

impl RecordClass {
    /// # Errors
    ///
    /// If the record class is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        Ok(Self::from(value))
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header.
///
/// The `Display` text of each is what gets sent back to a client
/// whose query fails with it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// QDCOUNT is zero.
    NoQuestions(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 255 octets in size.
    DomainTooLong(u16),

    /// A domain pointer leads back to a target already followed.
    DomainPointerCycle(u16),

    /// A length octet is longer than 63, but not a pointer.
    DomainLabelInvalid(u16),

    /// Rcode 1.
    FormatError(u16),

    /// Rcode 2.
    ServerFailure(u16),

    /// Rcode 3.
    NameError(u16),

    /// Rcode 4, or any opcode other than a standard query.
    NotImplemented(u16),

    /// Rcode 5.
    Refused(u16),

    /// Rcodes 6 to 15.
    UnsupportedOpcode(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id)
            | Error::NoQuestions(id)
            | Error::QuestionTooShort(id)
            | Error::ResourceRecordTooShort(id)
            | Error::DomainTooShort(id)
            | Error::DomainTooLong(id)
            | Error::DomainPointerCycle(id)
            | Error::DomainLabelInvalid(id)
            | Error::FormatError(id)
            | Error::ServerFailure(id)
            | Error::NameError(id)
            | Error::NotImplemented(id)
            | Error::Refused(id)
            | Error::UnsupportedOpcode(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CompletelyBusted | Error::HeaderTooShort(_) => {
                write!(f, "DNS message is too short")
            }
            Error::NoQuestions(_) => write!(f, "QDCOUNT is 0"),
            Error::QuestionTooShort(_)
            | Error::ResourceRecordTooShort(_)
            | Error::DomainTooShort(_) => write!(f, "unexpected EOF"),
            Error::DomainTooLong(_) => write!(f, "domain name is too long"),
            Error::DomainPointerCycle(_) => write!(f, "compression is cycled"),
            Error::DomainLabelInvalid(_) => write!(f, "invalid label length"),
            Error::FormatError(_) => write!(f, "the server was unable to interpret the query"),
            Error::ServerFailure(_) => write!(
                f,
                "the name server was unable to process this query due to a problem with the name server"
            ),
            Error::NameError(_) => {
                write!(f, "the domain name referenced in the query does not exist")
            }
            Error::NotImplemented(_) => {
                write!(f, "the name server doesn't support the requested kind of query")
            }
            Error::Refused(_) => write!(
                f,
                "the name server refuses to perform the specified operation for policy reasons"
            ),
            Error::UnsupportedOpcode(_) => {
                write!(f, "the unsupported option opcode (reserved for future)")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        let octet = *self.octets.get(self.position)?;
        self.position += 1;
        Some(octet)
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        let [hi, lo] = self.take(2)?.try_into().ok()?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        let octets: [u8; 4] = self.take(4)?.try_into().ok()?;
        Some(u32::from_be_bytes(octets))
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(size)?;
        let slice = self.octets.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}
