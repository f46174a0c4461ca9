use bytes::BytesMut;
use std::fmt;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Read a DNS message from a TCP stream.
///
/// A DNS TCP message is slightly different to a DNS UDP message: it
/// has a big-endian u16 prefix giving the total length of the
/// message.  This is redundant (since the header is fixed-size and
/// says how many fields there are, and the fields contain length
/// information), but it means the entire message can be read before
/// parsing begins.
///
/// Messages longer than `max_size` are refused without reading them.
pub async fn read_tcp_bytes(stream: &mut TcpStream, max_size: usize) -> Result<BytesMut, TcpError> {
    let expected = usize::from(stream.read_u16().await.map_err(TcpError::IO)?);
    if expected > max_size {
        return Err(TcpError::TooLong {
            size: expected,
            max_size,
        });
    }

    let mut bytes = BytesMut::with_capacity(expected);
    while bytes.len() < expected {
        match stream.read_buf(&mut bytes).await {
            Ok(0) => {
                return Err(TcpError::TooShort {
                    expected,
                    actual: bytes.len(),
                })
            }
            Ok(_) => (),
            Err(error) => return Err(TcpError::IO(error)),
        }
    }

    Ok(bytes)
}

/// Write a serialised message to a TCP stream, with the two-octet
/// length prefix.
pub async fn send_tcp_bytes(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), TcpError> {
    let len = u16::try_from(bytes.len()).map_err(|_| TcpError::TooLong {
        size: bytes.len(),
        max_size: u16::MAX.into(),
    })?;

    let mut framed = BytesMut::with_capacity(bytes.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(bytes);

    stream.write_all(&framed).await.map_err(TcpError::IO)
}

/// An error that can occur when reading or writing a DNS TCP message.
#[derive(Debug)]
pub enum TcpError {
    TooShort { expected: usize, actual: usize },
    TooLong { size: usize, max_size: usize },
    IO(io::Error),
}

impl fmt::Display for TcpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TcpError::TooShort { expected, actual } => {
                write!(f, "expected {expected} octets but got {actual}")
            }
            TcpError::TooLong { size, max_size } => {
                write!(f, "message of {size} octets exceeds limit of {max_size}")
            }
            TcpError::IO(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for TcpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TcpError::IO(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn tcp_framing_roundtrip() {
        let (mut client, mut server) = connected_pair().await;

        send_tcp_bytes(&mut client, &[1, 2, 3, 4, 5]).await.unwrap();
        let bytes = read_tcp_bytes(&mut server, 512).await.unwrap();

        assert_eq!(&[1, 2, 3, 4, 5][..], &bytes[..]);
    }

    #[tokio::test]
    async fn tcp_read_refuses_oversized() {
        let (mut client, mut server) = connected_pair().await;

        client.write_all(&[0x02, 0x01]).await.unwrap();

        assert!(matches!(
            read_tcp_bytes(&mut server, 512).await,
            Err(TcpError::TooLong {
                size: 513,
                max_size: 512
            })
        ));
    }

    #[tokio::test]
    async fn tcp_read_short_message() {
        let (mut client, mut server) = connected_pair().await;

        client.write_all(&[0, 10, 1, 2, 3]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_tcp_bytes(&mut server, 512).await,
            Err(TcpError::TooShort {
                expected: 10,
                actual: 3
            })
        ));
    }
}
