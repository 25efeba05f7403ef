/// Date formats the merger accepts when deciding whether two string
/// values are comparable dates.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", // Date only
    "%+",       // RFC 3339 / ISO 8601
];

/// HGNC bulk dataset refresh cadence, in hours.
pub const HGNC_REFRESH_HOURS: u64 = 168;
