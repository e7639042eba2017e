//! Installed-apps record parsing
//!
//! One input line is `dev_type \t dev_id \t lat \t lon \t app,app,...`.
//!
//! Structural problems (too few fields, missing identity, bad encoding) reject
//! the line. Numeric problems only degrade it:
//! - app ids that are not unsigned integers are dropped from the list
//! - a coordinate that is not a finite float is stored as absent
//!
//! Degraded lines are logged at info level and still loaded.

use tracing::info;

/// Minimum number of tab-separated fields in a line.
pub const MIN_FIELDS: usize = 5;

/// One device's installed apps, as read from a line
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub dev_type: String,
    pub dev_id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub apps: Vec<u32>,
}

impl ParsedRecord {
    /// Store key, `"{dev_type}:{dev_id}"`
    pub fn key(&self) -> String {
        format!("{}:{}", self.dev_type, self.dev_id)
    }
}

/// Why a line was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Line is not valid UTF-8
    InvalidEncoding,
    /// Fewer than five tab-separated fields
    TooFewFields,
    /// Empty device type or device id
    MissingIdentity,
    /// Device type has no shard
    UnknownDeviceType,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidEncoding => "invalid_encoding",
            RejectReason::TooFewFields => "too_few_fields",
            RejectReason::MissingIdentity => "missing_identity",
            RejectReason::UnknownDeviceType => "unknown_device_type",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a raw line carries nothing but whitespace
pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Decode and parse one raw line
pub fn parse_raw(line: &[u8]) -> Result<ParsedRecord, RejectReason> {
    let line = std::str::from_utf8(line).map_err(|_| RejectReason::InvalidEncoding)?;
    parse_line(line)
}

/// Parse one text line into a record
pub fn parse_line(line: &str) -> Result<ParsedRecord, RejectReason> {
    // Tabs are field separators, so only strip other surrounding whitespace
    let line = line.trim_matches(|c: char| c.is_whitespace() && c != '\t');

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < MIN_FIELDS {
        return Err(RejectReason::TooFewFields);
    }

    let dev_type = fields[0].trim();
    let dev_id = fields[1].trim();
    if dev_type.is_empty() || dev_id.is_empty() {
        return Err(RejectReason::MissingIdentity);
    }

    let apps = parse_apps(fields[4]).unwrap_or_else(|apps| {
        info!(line = %line, "Not all user apps are digits");
        apps
    });

    let lat = parse_coordinate(fields[2]);
    let lon = parse_coordinate(fields[3]);
    if lat.is_none() || lon.is_none() {
        info!(line = %line, "Invalid geo coords");
    }

    Ok(ParsedRecord {
        dev_type: dev_type.to_string(),
        dev_id: dev_id.to_string(),
        lat,
        lon,
        apps,
    })
}

/// `Ok` when every token is an app id, `Err` with the usable subset otherwise
fn parse_apps(raw: &str) -> Result<Vec<u32>, Vec<u32>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut apps = Vec::new();
    let mut clean = true;
    for token in raw.split(',') {
        match token.trim().parse::<u32>() {
            Ok(app) => apps.push(app),
            Err(_) => clean = false,
        }
    }

    if clean {
        Ok(apps)
    } else {
        Err(apps)
    }
}

fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_line() {
        let record = parse_line("idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23").unwrap();

        assert_eq!(record.dev_type, "idfa");
        assert_eq!(record.dev_id, "1rfw452y52g2gq4g");
        assert_eq!(record.lat, Some(55.55));
        assert_eq!(record.lon, Some(42.42));
        assert_eq!(record.apps, vec![1423, 43, 567, 3, 7, 23]);
        assert_eq!(record.key(), "idfa:1rfw452y52g2gq4g");
    }

    #[test]
    fn test_rejects_too_few_fields() {
        assert_eq!(
            parse_line("idfa\t1rfw452y52g2gq4g\t55.55\t42.42"),
            Err(RejectReason::TooFewFields)
        );
        assert_eq!(parse_line("garbage"), Err(RejectReason::TooFewFields));
    }

    #[test]
    fn test_rejects_missing_identity() {
        assert_eq!(
            parse_line("\tabc\t1.0\t2.0\t1,2"),
            Err(RejectReason::MissingIdentity)
        );
        assert_eq!(
            parse_line("gaid\t \t1.0\t2.0\t1,2"),
            Err(RejectReason::MissingIdentity)
        );
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        assert_eq!(
            parse_raw(b"idfa\t\xff\xfe\t1.0\t2.0\t1"),
            Err(RejectReason::InvalidEncoding)
        );
    }

    #[test]
    fn test_drops_non_numeric_apps() {
        let record = parse_line("gaid\tdev\t1.0\t2.0\t10,x, 20 ,-3,,30").unwrap();
        assert_eq!(record.apps, vec![10, 20, 30]);
    }

    #[test]
    fn test_empty_app_list_is_clean() {
        let record = parse_line("gaid\tdev\t1.0\t2.0\t").unwrap();
        assert!(record.apps.is_empty());
        assert_eq!(parse_apps(""), Ok(Vec::new()));
    }

    #[test]
    fn test_bad_coordinates_become_absent() {
        let record = parse_line("adid\tdev\tnorth\t42.42\t1").unwrap();
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, Some(42.42));

        let record = parse_line("adid\tdev\tNaN\tinf\t1").unwrap();
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, None);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let record = parse_line("dvid\tdev\t1.5\t-2.5\t7\textra\tmore").unwrap();
        assert_eq!(record.apps, vec![7]);
        assert_eq!(record.lon, Some(-2.5));
    }

    #[test]
    fn test_surrounding_spaces_are_trimmed() {
        let record = parse_line("  idfa\tdev\t1\t2\t3  \r").unwrap();
        assert_eq!(record.dev_type, "idfa");
        assert_eq!(record.apps, vec![3]);
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(b""));
        assert!(is_blank(b" \t\r"));
        assert!(!is_blank(b" x "));
    }
}
