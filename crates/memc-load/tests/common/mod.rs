//! Common test utilities for memc-load integration tests
//!
//! Provides an in-process fake memcached that speaks just enough of the text
//! protocol (`set` with a `STORED` or `NOT_STORED` reply) and helpers for
//! writing gzip fixtures.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use memc_load::config::{LoaderConfig, ShardTable};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// How the fake server answers `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Stored,
    NotStored,
}

/// One fake memcached shard listening on an ephemeral local port
pub struct FakeMemcached {
    addr: String,
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    connections: Arc<Mutex<usize>>,
}

impl FakeMemcached {
    pub async fn start() -> Result<Self> {
        Self::start_with(Reply::Stored).await
    }

    pub async fn start_with(reply: Reply) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind fake memcached")?;
        let addr = listener.local_addr()?.to_string();
        let data = Arc::new(Mutex::new(HashMap::new()));
        let connections = Arc::new(Mutex::new(0));

        let (store, opened) = (Arc::clone(&data), Arc::clone(&connections));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                *opened.lock().unwrap() += 1;
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let _ = serve(stream, store, reply).await;
                });
            }
        });

        Ok(Self {
            addr,
            data,
            connections,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }
}

async fn serve(
    stream: TcpStream,
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    reply: Reply,
) -> Result<()> {
    let mut stream = BufReader::new(stream);
    let mut header = String::new();

    loop {
        header.clear();
        if stream.read_line(&mut header).await? == 0 {
            return Ok(());
        }

        let parts: Vec<&str> = header.split_whitespace().collect();
        let (key, len) = match parts.as_slice() {
            ["set", key, _flags, _exptime, len] => (key.to_string(), len.parse::<usize>()?),
            _ => {
                stream.get_mut().write_all(b"ERROR\r\n").await?;
                continue;
            },
        };

        let mut value = vec![0u8; len + 2];
        stream.read_exact(&mut value).await?;
        if !value.ends_with(b"\r\n") {
            bail!("data block for '{key}' is not terminated");
        }
        value.truncate(len);

        let answer: &[u8] = match reply {
            Reply::Stored => {
                store.lock().unwrap().insert(key, value);
                b"STORED\r\n"
            },
            Reply::NotStored => b"NOT_STORED\r\n",
        };
        stream.get_mut().write_all(answer).await?;
    }
}

/// Fake shards for the four standard device types
pub struct FakeCluster {
    pub idfa: FakeMemcached,
    pub gaid: FakeMemcached,
    pub adid: FakeMemcached,
    pub dvid: FakeMemcached,
}

impl FakeCluster {
    pub async fn start() -> Result<Self> {
        Ok(Self {
            idfa: FakeMemcached::start().await?,
            gaid: FakeMemcached::start().await?,
            adid: FakeMemcached::start().await?,
            dvid: FakeMemcached::start().await?,
        })
    }

    pub fn shards(&self) -> ShardTable {
        [
            ("idfa", self.idfa.addr()),
            ("gaid", self.gaid.addr()),
            ("adid", self.adid.addr()),
            ("dvid", self.dvid.addr()),
        ]
        .into_iter()
        .collect()
    }

    pub fn total(&self) -> usize {
        self.idfa.len() + self.gaid.len() + self.adid.len() + self.dvid.len()
    }

    /// Loader configuration pointed at this cluster and `dir`
    pub fn config(&self, dir: &Path) -> LoaderConfig {
        let mut config = LoaderConfig {
            pattern: format!("{}/*.tsv.gz", dir.display()),
            shards: self.shards(),
            ..LoaderConfig::default()
        };
        config.writer.retry.base_delay = std::time::Duration::from_millis(1);
        config
    }
}

/// Write `content` gzip-compressed to `dir/name`
pub fn write_gz(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();
    path
}

/// `count` valid records spread round-robin over the four device types
pub fn valid_lines(count: usize) -> String {
    const TYPES: [&str; 4] = ["idfa", "gaid", "adid", "dvid"];
    (0..count)
        .map(|n| format!("{}\tdev{n:06}\t55.55\t42.42\t{},{}\n", TYPES[n % 4], n, n + 1))
        .collect()
}
