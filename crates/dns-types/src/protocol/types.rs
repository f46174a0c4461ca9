use bytes::Bytes;
use std::fmt;

/// Maximum encoded length of a domain name.  The number of labels
/// plus sum of the lengths of the labels.
pub const DOMAINNAME_MAX_LEN: usize = 255;

/// Maximum length of a single label in a domain name.
pub const LABEL_MAX_LEN: usize = 63;

/// Length of the fixed-size message header.
pub const HEADER_LEN: usize = 12;

/// Largest message which may be sent over UDP without EDNS.
pub const UDP_MESSAGE_SIZE: usize = 512;

/// Largest message accepted when EDNS is enabled.
pub const EDNS_MESSAGE_SIZE: usize = 4096;

/// Flags mask for the QR flag being set (response).
pub const HEADER_MASK_QR: u16 = 0b1000_0000_0000_0000;

/// Flags mask for the opcode field.
pub const HEADER_MASK_OPCODE: u16 = 0b0111_1000_0000_0000;

/// Offset for the opcode field.
pub const HEADER_OFFSET_OPCODE: usize = 11;

/// Flags mask for the AA flag being set (authoritative)
pub const HEADER_MASK_AA: u16 = 0b0000_0100_0000_0000;

/// Flags mask for the TC flag being set (truncated)
pub const HEADER_MASK_TC: u16 = 0b0000_0010_0000_0000;

/// Flags mask for the RD flag being set (desired)
pub const HEADER_MASK_RD: u16 = 0b0000_0001_0000_0000;

/// Flags mask for the RA flag being set (available)
pub const HEADER_MASK_RA: u16 = 0b0000_0000_1000_0000;

/// Flags mask for the reserved Z field.
pub const HEADER_MASK_Z: u16 = 0b0000_0000_0111_0000;

/// Offset for the Z field.
pub const HEADER_OFFSET_Z: usize = 4;

/// Flags mask for the rcode field.
pub const HEADER_MASK_RCODE: u16 = 0b0000_0000_0000_1111;

/// Offset for the rcode field.
pub const HEADER_OFFSET_RCODE: usize = 0;

/// The two high bits of a length octet which mark it as the first
/// half of a compression pointer.
pub const POINTER_TAG: u8 = 0b1100_0000;

/// The largest message offset a compression pointer can hold.
pub const POINTER_MAX_OFFSET: usize = 0b0011_1111_1111_1111;

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.1 of RFC 1035.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Header {
    /// A 16 bit identifier assigned by the program that generates any
    /// kind of query.  This identifier is copied the corresponding
    /// reply and can be used by the requester to match up replies to
    /// outstanding queries.
    pub id: u16,

    /// Whether this message is a query (0), or a response (1).
    pub is_response: bool,

    /// Kind of query in this message.  Only `Opcode::Standard` is
    /// served; anything else is answered with `NotImplemented`.
    pub opcode: Opcode,

    /// Authoritative Answer.
    pub is_authoritative: bool,

    /// TrunCation - specifies that this message was truncated due to
    /// length greater than that permitted on the transmission
    /// channel.
    pub is_truncated: bool,

    /// Recursion Desired - this bit may be set in a query and is
    /// copied into the response.
    pub recursion_desired: bool,

    /// Recursion Available - set in a response if the server will
    /// resolve queries on the client's behalf.
    pub recursion_available: bool,

    /// Reserved for future use, three bits.  Carried through as-is.
    pub z: u8,

    /// Response code - this 4 bit field is set as part of responses.
    pub rcode: Rcode,
}

impl Header {
    /// Unpack a 16-bit flags field into a header with the given ID.
    pub fn from_flags(id: u16, flags: u16) -> Self {
        let mut header = Self {
            id,
            is_response: false,
            opcode: Opcode::Standard,
            is_authoritative: false,
            is_truncated: false,
            recursion_desired: false,
            recursion_available: false,
            z: 0,
            rcode: Rcode::NoError,
        };
        header.set_flags(flags);
        header
    }

    /// Overwrite every flag from a packed 16-bit flags field.  This
    /// replaces the previous flags entirely, it does not merge them.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_flags(&mut self, flags: u16) {
        self.is_response = flags & HEADER_MASK_QR != 0;
        self.opcode = Opcode::from(((flags & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE) as u8);
        self.is_authoritative = flags & HEADER_MASK_AA != 0;
        self.is_truncated = flags & HEADER_MASK_TC != 0;
        self.recursion_desired = flags & HEADER_MASK_RD != 0;
        self.recursion_available = flags & HEADER_MASK_RA != 0;
        self.z = ((flags & HEADER_MASK_Z) >> HEADER_OFFSET_Z) as u8;
        self.rcode = Rcode::from(((flags & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE) as u8);
    }

    /// Pack the flags into their 16-bit wire representation.
    pub fn flags(&self) -> u16 {
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode =
            HEADER_MASK_OPCODE & (u16::from(u8::from(self.opcode)) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_z = HEADER_MASK_Z & (u16::from(self.z) << HEADER_OFFSET_Z);
        let field_rcode = HEADER_MASK_RCODE & (u16::from(u8::from(self.rcode)) << HEADER_OFFSET_RCODE);

        flag_qr | field_opcode | flag_aa | flag_tc | flag_rd | flag_ra | field_z | field_rcode
    }

    /// The rcode this header should be judged by: a non-standard
    /// opcode is never served, whatever the wire rcode says.
    pub fn effective_rcode(&self) -> Rcode {
        if self.opcode == Opcode::Standard {
            self.rcode
        } else {
            Rcode::NotImplemented
        }
    }

    /// The header of a response to this query.
    pub fn make_response(&self) -> Self {
        Self {
            id: self.id,
            is_response: true,
            opcode: Opcode::Standard,
            is_authoritative: false,
            is_truncated: false,
            recursion_desired: self.recursion_desired,
            recursion_available: true,
            z: 0,
            rcode: Rcode::NoError,
        }
    }
}

/// A `Header` as it appears on the network, along with the four
/// section counts.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    pub header: Header,

    /// an unsigned 16 bit integer specifying the number of entries in
    /// the question section.
    pub qdcount: u16,

    /// an unsigned 16 bit integer specifying the number of resource
    /// records in the answer section.
    pub ancount: u16,

    /// an unsigned 16 bit integer specifying the number of name
    /// server resource records in the authority records section.
    pub nscount: u16,

    /// an unsigned 16 bit integer specifying the number of
    /// resource records in the additional records section.
    pub arcount: u16,
}

impl WireHeader {
    /// The header of a single-question response to this query, with
    /// no records yet.
    pub fn make_response(&self) -> Self {
        Self {
            header: self.header.make_response(),
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }
}

/// The question section has a list of questions (usually 1 but
/// possibly more) being asked.  This is the structure for a single
/// question.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                     QNAME                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QTYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QCLASS                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.2 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Question {
    pub name: DomainName,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.qclass, self.qtype)
    }
}

/// A single resource record, with its RDATA left uninterpreted.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                                               /
///     /                      NAME                     /
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     CLASS                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TTL                      |
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                   RDLENGTH                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
///     /                     RDATA                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.3 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ResourceRecord {
    pub name: DomainName,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    /// Seconds this record may be cached for.
    pub ttl: u32,
    /// RDLENGTH is the length of this.  For A and AAAA records it is
    /// the address in network byte order.
    pub rdata: Bytes,
}

/// What sort of query this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Opcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OpcodeReserved(u8);

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(octet)) => octet,
        }
    }
}

/// What sort of response this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Rcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RcodeReserved(u8);

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rcode::NoError => write!(f, "no-error"),
            Rcode::FormatError => write!(f, "format-error"),
            Rcode::ServerFailure => write!(f, "server-failure"),
            Rcode::NameError => write!(f, "name-error"),
            Rcode::NotImplemented => write!(f, "not-implemented"),
            Rcode::Refused => write!(f, "refused"),
            Rcode::Reserved(_) => write!(f, "reserved"),
        }
    }
}

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(octet)) => octet,
        }
    }
}

/// A domain name is a sequence of labels, where each label is a
/// length octet followed by that number of octets.  The terminating
/// root label is implicit: it is not stored in `labels`.
///
/// A label must be 63 octets or shorter.  A name must be 255 octets
/// or shorter in total, including both length and label octets and
/// the terminator.
///
/// Labels keep the case they were created with.  Use `to_lowercase`
/// for comparisons which should ignore case.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DomainName {
    pub labels: Vec<Label>,
    // INVARIANT: len == 1 + len(labels) + sum(map(len, labels))
    pub len: usize,
}

impl DomainName {
    pub fn root_domain() -> Self {
        DomainName {
            labels: Vec::new(),
            len: 1,
        }
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.len);
        let mut first = true;
        for label in &self.labels {
            if first {
                first = false;
            } else {
                out.push('.');
            }
            for octet in label.octets() {
                out.push(*octet as char);
            }
        }

        out
    }

    /// Parse a name written as labels joined by '.'.  Empty labels
    /// are skipped, so a trailing dot is optional and `""` and `"."`
    /// are both the root.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        let mut labels = Vec::with_capacity(5);

        for label_chars in s.split('.') {
            if label_chars.is_empty() {
                continue;
            }

            match label_chars.as_bytes().try_into() {
                Ok(label) => labels.push(label),
                Err(_) => return None,
            }
        }

        Self::from_labels(labels)
    }

    /// Build a name from its non-root labels.
    pub fn from_labels(labels: Vec<Label>) -> Option<Self> {
        let mut len = 1;

        for label in &labels {
            if label.is_empty() {
                return None;
            }
            len += 1 + usize::from(label.len());
        }

        if len <= DOMAINNAME_MAX_LEN {
            Some(Self { labels, len })
        } else {
            None
        }
    }

    /// Copy of this name with every label folded to ASCII lowercase.
    pub fn to_lowercase(&self) -> Self {
        Self {
            labels: self.labels.iter().map(Label::to_lowercase).collect(),
            len: self.len,
        }
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainName")
            .field("to_dotted_string()", &self.to_dotted_string())
            .finish()
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.to_dotted_string())
    }
}

/// A label is just a sequence of octets.  A label can be no longer
/// than 63 octets.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Label {
    /// Private to this module so constructing an invalid `Label` is
    /// impossible.
    octets: Bytes,
}

impl Label {
    #[allow(clippy::missing_panics_doc)]
    pub fn len(&self) -> u8 {
        // safe as the `TryFrom` ensures a label is <= 63 bytes
        self.octets.len().try_into().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    pub fn octets(&self) -> &Bytes {
        &self.octets
    }

    pub fn to_lowercase(&self) -> Self {
        Self {
            octets: Bytes::from(self.octets.to_ascii_lowercase()),
        }
    }
}

impl TryFrom<&[u8]> for Label {
    type Error = LabelTryFromOctetsError;

    fn try_from(octets: &[u8]) -> Result<Self, Self::Error> {
        if octets.len() > LABEL_MAX_LEN {
            return Err(LabelTryFromOctetsError::TooLong);
        }

        Ok(Self {
            octets: Bytes::copy_from_slice(octets),
        })
    }
}

/// Errors that can arise when converting a `[u8]` into a `Label`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LabelTryFromOctetsError {
    TooLong,
}

/// Query types are a superset of record types.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QueryType {
    Record(RecordType),
    AXFR,
    MAILB,
    MAILA,
    Wildcard,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryType::Record(rtype) => rtype.fmt(f),
            QueryType::AXFR => write!(f, "AXFR"),
            QueryType::MAILA => write!(f, "MAILA"),
            QueryType::MAILB => write!(f, "MAILB"),
            QueryType::Wildcard => write!(f, "ANY"),
        }
    }
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            252 => QueryType::AXFR,
            253 => QueryType::MAILB,
            254 => QueryType::MAILA,
            255 => QueryType::Wildcard,
            _ => QueryType::Record(RecordType::from(value)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::AXFR => 252,
            QueryType::MAILB => 253,
            QueryType::MAILA => 254,
            QueryType::Wildcard => 255,
            QueryType::Record(rtype) => rtype.into(),
        }
    }
}

/// Query classes are a superset of record classes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QueryClass {
    Record(RecordClass),
    Wildcard,
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryClass::Record(rclass) => rclass.fmt(f),
            QueryClass::Wildcard => write!(f, "ANY"),
        }
    }
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryClass::Wildcard,
            _ => QueryClass::Record(RecordClass::from(value)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::Wildcard => 255,
            QueryClass::Record(rclass) => rclass.into(),
        }
    }
}

/// Record types are used by resource records and by queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordType {
    A,
    NS,
    MD,
    MF,
    CNAME,
    SOA,
    MB,
    MG,
    MR,
    NULL,
    WKS,
    PTR,
    HINFO,
    MINFO,
    MX,
    TXT,
    AAAA,
    Unknown(RecordTypeUnknown),
}

/// A struct with a private constructor, to ensure invalid `RecordType`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordTypeUnknown(u16);

impl RecordType {
    /// Whether the RDATA of this type is a host address, the only
    /// records which get cached.
    pub fn is_address(&self) -> bool {
        matches!(self, RecordType::A | RecordType::AAAA)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::MD => write!(f, "MD"),
            RecordType::MF => write!(f, "MF"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::MB => write!(f, "MB"),
            RecordType::MG => write!(f, "MG"),
            RecordType::MR => write!(f, "MR"),
            RecordType::NULL => write!(f, "NULL"),
            RecordType::WKS => write!(f, "WKS"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::HINFO => write!(f, "HINFO"),
            RecordType::MINFO => write!(f, "MINFO"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::Unknown(RecordTypeUnknown(n)) => write!(f, "TYPE{n}"),
        }
    }
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            3 => RecordType::MD,
            4 => RecordType::MF,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            7 => RecordType::MB,
            8 => RecordType::MG,
            9 => RecordType::MR,
            10 => RecordType::NULL,
            11 => RecordType::WKS,
            12 => RecordType::PTR,
            13 => RecordType::HINFO,
            14 => RecordType::MINFO,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            _ => RecordType::Unknown(RecordTypeUnknown(value)),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::MD => 3,
            RecordType::MF => 4,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::MB => 7,
            RecordType::MG => 8,
            RecordType::MR => 9,
            RecordType::NULL => 10,
            RecordType::WKS => 11,
            RecordType::PTR => 12,
            RecordType::HINFO => 13,
            RecordType::MINFO => 14,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::Unknown(RecordTypeUnknown(value)) => value,
        }
    }
}

/// Record classes are used by resource records and by queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordClass {
    IN,
    CS,
    CH,
    HS,
    Unknown(RecordClassUnknown),
}

/// A struct with a private constructor, to ensure invalid `RecordClass`es
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordClassUnknown(u16);

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::CS => write!(f, "CS"),
            RecordClass::CH => write!(f, "CH"),
            RecordClass::HS => write!(f, "HS"),
            RecordClass::Unknown(RecordClassUnknown(n)) => write!(f, "CLASS{n}"),
        }
    }
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            2 => RecordClass::CS,
            3 => RecordClass::CH,
            4 => RecordClass::HS,
            _ => RecordClass::Unknown(RecordClassUnknown(value)),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::CS => 2,
            RecordClass::CH => 3,
            RecordClass::HS => 4,
            RecordClass::Unknown(RecordClassUnknown(value)) => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn u8_opcode_roundtrip() {
        for i in 0..15 {
            assert_eq!(u8::from(Opcode::from(i)), i);
        }
    }

    #[test]
    fn u8_rcode_roundtrip() {
        for i in 0..15 {
            assert_eq!(u8::from(Rcode::from(i)), i);
        }
    }

    #[test]
    fn u16_querytype_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(QueryType::from(i)), i);
        }
    }

    #[test]
    fn u16_recordtype_roundtrip() {
        for i in 0..100 {
            assert_eq!(u16::from(RecordType::from(i)), i);
        }
    }

    #[test]
    fn u16_recordclass_roundtrip() {
        for i in 0..100 {
            assert_eq!(u16::from(RecordClass::from(i)), i);
        }
    }

    #[test]
    fn wire_type_codes() {
        assert_eq!(RecordType::A, RecordType::from(1));
        assert_eq!(RecordType::TXT, RecordType::from(16));
        assert_eq!(RecordType::AAAA, RecordType::from(28));
        assert_eq!(RecordClass::HS, RecordClass::from(4));
        assert!(RecordType::A.is_address());
        assert!(RecordType::AAAA.is_address());
        assert!(!RecordType::CNAME.is_address());
    }

    #[test]
    fn flags_pack_layout() {
        let header = Header {
            id: 0,
            is_response: true,
            opcode: Opcode::Status,
            is_authoritative: true,
            is_truncated: false,
            recursion_desired: true,
            recursion_available: true,
            z: 0b101,
            rcode: Rcode::Refused,
        };

        assert_eq!(0b1_0010_1_0_1_1_101_0101, header.flags());
    }

    #[test]
    fn flags_unpack_then_pack() {
        for flags in [0, 0x0100, 0x8180, 0x8183, 0x2800, 0xFFFF] {
            assert_eq!(flags, Header::from_flags(0, flags).flags());
        }
    }

    #[test]
    fn set_flags_overwrites() {
        let mut header = Header::from_flags(1, 0xFFFF);
        header.set_flags(HEADER_MASK_QR);

        assert!(header.is_response);
        assert_eq!(Opcode::Standard, header.opcode);
        assert!(!header.is_authoritative);
        assert!(!header.is_truncated);
        assert!(!header.recursion_desired);
        assert!(!header.recursion_available);
        assert_eq!(0, header.z);
        assert_eq!(Rcode::NoError, header.rcode);
        assert_eq!(HEADER_MASK_QR, header.flags());
    }

    #[test]
    fn effective_rcode_forces_not_implemented() {
        // opcode 1, wire rcode 0
        assert_eq!(
            Rcode::NotImplemented,
            Header::from_flags(0, 0x0800).effective_rcode()
        );
        // opcode 2, wire rcode 5
        assert_eq!(
            Rcode::NotImplemented,
            Header::from_flags(0, 0x1005).effective_rcode()
        );
        // opcode 0, wire rcode 3
        assert_eq!(
            Rcode::NameError,
            Header::from_flags(0, 0x0003).effective_rcode()
        );
    }

    #[test]
    fn make_response_keeps_id_and_rd() {
        let query = Header::from_flags(0xBEEF, HEADER_MASK_RD);
        let response = query.make_response();

        assert_eq!(0xBEEF, response.id);
        assert!(response.is_response);
        assert!(response.recursion_desired);
        assert!(response.recursion_available);
        assert_eq!(Rcode::NoError, response.rcode);
    }

    #[test]
    fn domainname_root_conversions() {
        assert_eq!(
            Some(DomainName::root_domain()),
            DomainName::from_dotted_string(".")
        );

        assert_eq!(
            Some(DomainName::root_domain()),
            DomainName::from_dotted_string("")
        );

        assert_eq!(
            Some(DomainName::root_domain()),
            DomainName::from_labels(Vec::new())
        );

        assert_eq!(".", DomainName::root_domain().to_dotted_string());
    }

    #[test]
    fn domainname_trailing_dot_is_optional() {
        assert_eq!(domain("www.example.com"), domain("www.example.com."));
        assert_eq!("www.example.com", domain("www.example.com.").to_dotted_string());
    }

    #[test]
    fn domainname_preserves_case() {
        let name = domain("WwW.Example.COM");
        assert_eq!("WwW.Example.COM", name.to_dotted_string());
        assert_eq!(domain("www.example.com"), name.to_lowercase());
    }

    #[test]
    fn domainname_too_long() {
        let label = "a".repeat(LABEL_MAX_LEN);
        assert!(DomainName::from_dotted_string(&format!("{label}.{label}.{label}")).is_some());
        assert!(
            DomainName::from_dotted_string(&format!("{label}.{label}.{label}.{label}")).is_none()
        );
        assert!(DomainName::from_dotted_string(&"b".repeat(LABEL_MAX_LEN + 1)).is_none());
    }

    #[test]
    fn domainname_conversions() {
        for _ in 0..100 {
            let name = arbitrary_domainname();
            let dotted = name.to_dotted_string();

            assert_eq!(Some(name), DomainName::from_dotted_string(&dotted));
        }
    }
}

#[cfg(any(feature = "test-util", test))]
#[allow(clippy::missing_panics_doc)]
pub mod test_util {
    use super::*;

    use bytes::BytesMut;
    use rand::Rng;
    use std::net::{Ipv4Addr, Ipv6Addr};

    use crate::protocol::serialise::WritableBuffer;

    /// A random name of up to five labels, mixed case, no dots.
    pub fn arbitrary_domainname() -> DomainName {
        let mut rng = rand::rng();
        let labels_len = rng.random_range(1..5);
        let mut labels = Vec::with_capacity(labels_len);

        for _ in 0..labels_len {
            let label_len = rng.random_range(1..20);
            let mut octets = Vec::with_capacity(label_len);
            for _ in 0..label_len {
                let mut chr = rng.random_range(33..126);
                if chr == b'.' {
                    chr = b'X';
                }
                octets.push(chr);
            }
            labels.push(Label::try_from(&octets[..]).unwrap());
        }

        DomainName::from_labels(labels).unwrap()
    }

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype: RecordType::A,
            rclass: RecordClass::IN,
            ttl: 300,
            rdata: Bytes::copy_from_slice(&address.octets()),
        }
    }

    pub fn aaaa_record(name: &str, address: Ipv6Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype: RecordType::AAAA,
            rclass: RecordClass::IN,
            ttl: 300,
            rdata: Bytes::copy_from_slice(&address.octets()),
        }
    }

    pub fn cname_record(name: &str, target_name: &str) -> ResourceRecord {
        let mut target = WritableBuffer::default();
        domain(target_name).serialise(&mut target, false);

        ResourceRecord {
            name: domain(name),
            rtype: RecordType::CNAME,
            rclass: RecordClass::IN,
            ttl: 300,
            rdata: target.octets.freeze(),
        }
    }

    pub fn question(name: &str, rtype: RecordType) -> Question {
        Question {
            name: domain(name),
            qtype: QueryType::Record(rtype),
            qclass: QueryClass::Record(RecordClass::IN),
        }
    }

    /// A standard recursive query for the given questions.
    pub fn query_octets(id: u16, questions: &[Question]) -> BytesMut {
        let mut buffer = WritableBuffer::default();
        WireHeader {
            header: Header::from_flags(id, HEADER_MASK_RD),
            qdcount: questions.len().try_into().unwrap(),
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
        .serialise(&mut buffer);
        for question in questions {
            question.serialise(&mut buffer);
        }
        buffer.octets
    }

    /// An upstream-style response: the questions echoed back, then
    /// the answers, with names compressed.
    pub fn response_octets(id: u16, questions: &[Question], answers: &[ResourceRecord]) -> BytesMut {
        let mut buffer = WritableBuffer::default();
        WireHeader {
            header: Header::from_flags(id, HEADER_MASK_RD).make_response(),
            qdcount: questions.len().try_into().unwrap(),
            ancount: answers.len().try_into().unwrap(),
            nscount: 0,
            arcount: 0,
        }
        .serialise(&mut buffer);
        for question in questions {
            question.serialise(&mut buffer);
        }
        for rr in answers {
            rr.serialise(&mut buffer).unwrap();
        }
        buffer.octets
    }
}
