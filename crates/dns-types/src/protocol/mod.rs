//! The DNS wire format: headers, questions, answer records, and
//! compressed names.  Record data is carried as opaque octets.

pub mod deserialise;
pub mod serialise;
pub mod types;
