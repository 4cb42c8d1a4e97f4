use chrono::{DateTime, Utc};

/// An opaque mapping from string keys to JSON-compatible values. The
/// extractor never interprets a record's contents except to rename and
/// coerce top-level keys in [`crate::transform`].
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A half-open time interval `[from, to)`, UTC, millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Panics if `from >= to`. Callers that need to represent a possibly
    /// empty window should compare `from`/`to` themselves before
    /// constructing one; windows are a non-empty-by-construction type.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        assert!(from < to, "TimeWindow requires from < to: {from} >= {to}");
        Self { from, to }
    }

    pub fn is_empty(from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        from >= to
    }

    /// ISO-8601 with microsecond precision and a literal `Z`, matching the
    /// upstream wire format (`YYYY-MM-DDTHH:MM:SS.ffffffZ`).
    pub fn from_wire(&self) -> String {
        wire_timestamp(self.from)
    }

    pub fn to_wire(&self) -> String {
        wire_timestamp(self.to)
    }

    pub fn midpoint(&self) -> DateTime<Utc> {
        self.from + (self.to - self.from) / 2
    }
}

pub fn wire_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// The server's declared total for a window, or "absent" when the probe
/// failed or the server reported no total. The planner treats absent as
/// unsafe and shrinks the candidate window.
pub type CountEstimate = Option<i64>;
