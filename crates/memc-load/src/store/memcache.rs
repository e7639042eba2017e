//! Minimal memcached text-protocol client
//!
//! Only `set` is needed: `set <key> <flags> <exptime> <bytes>\r\n<data>\r\n`,
//! answered by a single status line.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use super::{KvStore, StoreConnector, StoreError};

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Opens plain TCP connections to memcached shards
#[derive(Debug, Clone, Copy, Default)]
pub struct MemcacheConnector;

#[async_trait]
impl StoreConnector for MemcacheConnector {
    type Store = MemcacheConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Store, StoreError> {
        MemcacheConnection::connect(addr).await
    }
}

/// One connection to one memcached server
#[derive(Debug)]
pub struct MemcacheConnection {
    stream: BufStream<TcpStream>,
}

impl MemcacheConnection {
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| StoreError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream: BufStream::new(stream),
        })
    }

    async fn read_reply(&mut self) -> Result<String, StoreError> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await?;
        if read == 0 {
            return Err(StoreError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl KvStore for MemcacheConnection {
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;

        let header = format!("set {} 0 0 {}\r\n", key, value.len());
        self.stream.write_all(header.as_bytes()).await?;
        self.stream.write_all(value).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;

        let reply = self.read_reply().await?;
        interpret_set_reply(&reply)
    }
}

/// Keys are 1..=250 bytes with no whitespace or control characters
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.bytes().all(|b| b.is_ascii_graphic() || b >= 0x80);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn interpret_set_reply(reply: &str) -> Result<(), StoreError> {
    match reply {
        "STORED" => Ok(()),
        "NOT_STORED" | "EXISTS" | "NOT_FOUND" => Err(StoreError::NotStored),
        "ERROR" => Err(StoreError::Server("ERROR".to_string())),
        other => {
            if let Some(message) = other
                .strip_prefix("SERVER_ERROR ")
                .or_else(|| other.strip_prefix("CLIENT_ERROR "))
            {
                Err(StoreError::Server(message.to_string()))
            } else {
                Err(StoreError::Protocol(other.to_string()))
            }
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accept one connection, read one `set`, answer with `reply`
    async fn one_shot_server(reply: &'static str) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = tokio::io::BufReader::new(socket);
            let mut header = String::new();
            socket.read_line(&mut header).await.unwrap();
            let len: usize = header.split_whitespace().nth(4).unwrap().parse().unwrap();
            let mut body = vec![0u8; len + 2];
            socket.read_exact(&mut body).await.unwrap();
            socket.get_mut().write_all(reply.as_bytes()).await.unwrap();

            let mut request = header.into_bytes();
            request.extend_from_slice(&body);
            request
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_set_stored() {
        let (addr, server) = one_shot_server("STORED\r\n").await;
        let mut conn = MemcacheConnection::connect(&addr).await.unwrap();

        conn.set("idfa:abc", b"\x08\x01").await.unwrap();

        let request = server.await.unwrap();
        assert_eq!(request, b"set idfa:abc 0 0 2\r\n\x08\x01\r\n");
    }

    #[tokio::test]
    async fn test_set_not_stored_is_an_error() {
        let (addr, _server) = one_shot_server("NOT_STORED\r\n").await;
        let mut conn = MemcacheConnection::connect(&addr).await.unwrap();

        let err = conn.set("gaid:abc", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotStored));
    }

    #[tokio::test]
    async fn test_closed_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut conn = MemcacheConnection::connect(&addr).await.unwrap();
        let err = conn.set("idfa:abc", b"x").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = MemcacheConnection::connect(&addr).await.unwrap_err();
        assert!(matches!(err, StoreError::Connect { .. }));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("idfa:1rfw452y52g2gq4g").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("idfa:with space").is_err());
        assert!(validate_key("idfa:\x01").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_interpret_replies() {
        assert!(interpret_set_reply("STORED").is_ok());
        assert!(matches!(
            interpret_set_reply("SERVER_ERROR out of memory"),
            Err(StoreError::Server(m)) if m == "out of memory"
        ));
        assert!(matches!(
            interpret_set_reply("CLIENT_ERROR bad data chunk"),
            Err(StoreError::Server(_))
        ));
        assert!(matches!(
            interpret_set_reply("VALUE x"),
            Err(StoreError::Protocol(_))
        ));
    }
}
