/// Server-generated job identifiers are a monotonic i64 sequence.
pub type JobId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
