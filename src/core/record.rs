//! Measurements and their InfluxDB line-protocol encoding.
//!
//! ```text
//! acceleration,type=linear,src=imu x=0.12,y=-0.03,z=0.0 1700000000000000000
//! acceleration,type=gravity,src=imu x=0.0,y=0.0,z=9.81 1700000000000000000
//! orientation,type=euler,src=imu yaw=359.9375,pitch=-1.5,roll=0.0 1700000000000000000
//! ```

use std::{
    fmt,
    fmt::Write as _,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::time::Instant;

/// Vector quantities read from the sensor on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    LinearAcceleration,
    Gravity,
    Orientation,
}

impl MeasurementKind {
    /// Read order within one tick.
    pub const ALL: [MeasurementKind; 3] = [
        MeasurementKind::LinearAcceleration,
        MeasurementKind::Gravity,
        MeasurementKind::Orientation,
    ];

    /// Line-protocol measurement name.
    pub fn measurement(&self) -> &'static str {
        match self {
            MeasurementKind::LinearAcceleration | MeasurementKind::Gravity => "acceleration",
            MeasurementKind::Orientation => "orientation",
        }
    }

    /// Value of the `type` tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            MeasurementKind::LinearAcceleration => "linear",
            MeasurementKind::Gravity => "gravity",
            MeasurementKind::Orientation => "euler",
        }
    }

    pub fn field_names(&self) -> [&'static str; 3] {
        match self {
            MeasurementKind::LinearAcceleration | MeasurementKind::Gravity => ["x", "y", "z"],
            MeasurementKind::Orientation => ["yaw", "pitch", "roll"],
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementKind::LinearAcceleration => write!(f, "linear acceleration"),
            MeasurementKind::Gravity => write!(f, "gravity"),
            MeasurementKind::Orientation => write!(f, "orientation"),
        }
    }
}

/// One sensor reading. Fields always match the schema of `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    kind: MeasurementKind,
    /// In `kind.field_names()` order.
    values: [f64; 3],
    timestamp_ns: u64,
}

impl Measurement {
    /// Builds a measurement from a vector as the sensor returns it.
    ///
    /// Euler vectors arrive as (heading, roll, pitch) and are stored as
    /// (yaw, pitch, roll).
    pub fn from_vector(kind: MeasurementKind, raw: [f64; 3], timestamp_ns: u64) -> Self {
        let values = match kind {
            MeasurementKind::Orientation => [raw[0], raw[2], raw[1]],
            _ => raw,
        };
        Self {
            kind,
            values,
            timestamp_ns,
        }
    }

    pub fn kind(&self) -> MeasurementKind {
        self.kind
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.kind
            .field_names()
            .into_iter()
            .zip(self.values.iter().copied())
    }
}

/// A newline-terminated line-protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord(String);

impl EncodedRecord {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EncodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes a measurement. Deterministic: equal input gives equal bytes.
pub fn encode(measurement: &Measurement) -> EncodedRecord {
    let kind = measurement.kind();
    let mut line = String::with_capacity(96);

    let _ = write!(line, "{},type={},src=imu ", kind.measurement(), kind.type_tag());
    for (i, (name, value)) in measurement.fields().enumerate() {
        if i > 0 {
            line.push(',');
        }
        // `{:?}` is the shortest round-trip form and always keeps a `.0`.
        let _ = write!(line, "{}={:?}", name, value);
    }
    let _ = writeln!(line, " {}", measurement.timestamp_ns());

    EncodedRecord(line)
}

/// Concatenates a batch into one payload, order preserved.
pub fn concat(batch: &[EncodedRecord]) -> String {
    let mut payload = String::with_capacity(batch.iter().map(EncodedRecord::len).sum());
    for record in batch {
        payload.push_str(record.as_str());
    }
    payload
}

/// Nanosecond timestamps anchored to the Unix epoch when the clock is
/// created and advanced by a monotonic clock, so they never go backwards
/// within one run even if the wall clock is stepped.
#[derive(Debug, Clone)]
pub struct TimestampClock {
    anchor_ns: u64,
    start: Instant,
}

impl TimestampClock {
    pub fn new() -> Self {
        let anchor_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self::with_anchor(anchor_ns)
    }

    pub fn with_anchor(anchor_ns: u64) -> Self {
        Self {
            anchor_ns,
            start: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        let elapsed = u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.anchor_ns.saturating_add(elapsed)
    }
}

impl Default for TimestampClock {
    fn default() -> Self {
        Self::new()
    }
}
