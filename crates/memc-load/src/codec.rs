//! `UserApps` protobuf codec
//!
//! Wire schema (proto2):
//!
//! ```text
//! message UserApps {
//!     repeated uint32 apps = 1;
//!     optional double lat = 2;
//!     optional double lon = 3;
//! }
//! ```

use memc_common::{MemcError, Result};
use prost::Message;

use crate::record::{parse_line, ParsedRecord};

/// Two-device sample used by the `--test` self check.
pub const SELF_TEST_SAMPLE: &str = "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23\n\
                                    gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424";

/// Value stored under `"{dev_type}:{dev_id}"`
#[derive(Clone, PartialEq, Message)]
pub struct UserApps {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

impl From<&ParsedRecord> for UserApps {
    fn from(record: &ParsedRecord) -> Self {
        Self {
            apps: record.apps.clone(),
            lat: record.lat,
            lon: record.lon,
        }
    }
}

/// Serialize the value part of a record
pub fn encode(record: &ParsedRecord) -> Vec<u8> {
    UserApps::from(record).encode_to_vec()
}

/// Parse a stored value
pub fn decode(bytes: &[u8]) -> Result<UserApps> {
    UserApps::decode(bytes).map_err(|e| MemcError::Codec(e.to_string()))
}

/// Round-trip every line of [`SELF_TEST_SAMPLE`] through the codec.
///
/// Returns the number of records checked.
pub fn self_test() -> Result<usize> {
    let mut checked = 0;
    for line in SELF_TEST_SAMPLE.lines() {
        let record = parse_line(line).map_err(|reason| {
            MemcError::Parse(format!("self-test line rejected ({reason}): {line}"))
        })?;

        let expected = UserApps::from(&record);
        let unpacked = decode(&encode(&record))?;
        if unpacked != expected {
            return Err(MemcError::Codec(format!(
                "round trip mismatch for {}: {:?} != {:?}",
                record.key(),
                unpacked,
                expected
            )));
        }
        checked += 1;
    }
    Ok(checked)
}
