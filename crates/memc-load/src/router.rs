//! Routing parsed records to their memcached shard

use std::sync::Arc;
use tracing::{error, warn};

use crate::codec;
use crate::config::ShardTable;
use crate::record::{parse_raw, ParsedRecord, RejectReason};

/// A routed, encoded record waiting for a writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// `host:port` of the shard that owns the device type
    pub shard: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Turns raw lines into work items
#[derive(Debug, Clone)]
pub struct Router {
    shards: Arc<ShardTable>,
}

impl Router {
    pub fn new(shards: Arc<ShardTable>) -> Self {
        Self { shards }
    }

    /// Pick the shard for a record and encode it
    pub fn route(&self, record: &ParsedRecord) -> Result<WorkItem, RejectReason> {
        let shard = self.shards.get(&record.dev_type).ok_or_else(|| {
            error!(dev_type = %record.dev_type, "Unknown device type");
            RejectReason::UnknownDeviceType
        })?;

        Ok(WorkItem {
            shard: shard.to_string(),
            key: record.key(),
            payload: codec::encode(record),
        })
    }

    /// Parse, route and encode one raw line.
    ///
    /// Every rejection is logged here, once, with its reason.
    pub fn route_raw(&self, line: &[u8]) -> Result<WorkItem, RejectReason> {
        let record = parse_raw(line).map_err(|reason| {
            warn!(
                reason = %reason,
                line = %String::from_utf8_lossy(line),
                "Malformed record dropped"
            );
            reason
        })?;
        self.route(&record)
    }
}
