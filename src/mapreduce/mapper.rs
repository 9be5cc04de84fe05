//! Per-file speed aggregation
//!
//! The mapper streams one object, splits it into lines and keeps a running
//! speed sum and trip count per pickup day of week. Rows that are not trip
//! records, or whose speed is undefined, are skipped rather than failing the
//! file. Only transport errors fail the map.

use chrono::{DateTime, Datelike, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use futures::StreamExt;
use tracing::trace;

use super::errors::{MapReduceError, MapReduceResult};
use super::types::DayAggregate;
use crate::storage::ByteStream;

/// Columns in a trip record
pub const TRIP_COLUMNS: usize = 17;

const PICKUP_COLUMN: usize = 1;
const DROPOFF_COLUMN: usize = 2;
const DISTANCE_COLUMN: usize = 4;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Why a row did not contribute to the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSkip {
    /// Header, blank line or anything without the trip record shape
    NotATrip,
    /// Trip record with an unreadable timestamp or distance
    Unparseable,
    NonPositiveDistance,
    NonPositiveDuration,
    UndefinedSpeed,
}

/// A trip that contributes to the aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripSpeed {
    /// 0 = Sunday
    pub weekday: usize,
    pub speed: f64,
}

/// Parse a timestamp in any of the layouts seen in trip exports
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|timestamp| timestamp.naive_local())
        })
}

/// Classify one record
pub fn trip_speed(record: &StringRecord) -> Result<TripSpeed, RowSkip> {
    if record.len() != TRIP_COLUMNS {
        return Err(RowSkip::NotATrip);
    }
    if record[0].parse::<u64>().is_err() {
        return Err(RowSkip::NotATrip);
    }

    let pickup = parse_timestamp(&record[PICKUP_COLUMN]).ok_or(RowSkip::Unparseable)?;
    let dropoff = parse_timestamp(&record[DROPOFF_COLUMN]).ok_or(RowSkip::Unparseable)?;
    let distance: f64 = record[DISTANCE_COLUMN]
        .parse()
        .map_err(|_| RowSkip::Unparseable)?;

    if distance <= 0.0 {
        return Err(RowSkip::NonPositiveDistance);
    }

    let elapsed_hours = (dropoff - pickup).num_milliseconds() as f64 / 3_600_000.0;
    if elapsed_hours <= 0.0 {
        return Err(RowSkip::NonPositiveDuration);
    }

    let speed = distance / elapsed_hours;
    if !speed.is_finite() {
        return Err(RowSkip::UndefinedSpeed);
    }

    Ok(TripSpeed {
        weekday: pickup.weekday().num_days_from_sunday() as usize,
        speed,
    })
}

/// Running per-day speed sums
#[derive(Debug, Clone, Default)]
pub struct SpeedAccumulator {
    sums: [f64; 7],
    counts: [u64; 7],
    skipped: u64,
}

impl SpeedAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a block of complete lines
    pub fn feed(&mut self, lines: &[u8]) {
        if lines.is_empty() {
            return;
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All)
            .from_reader(lines);

        for record in reader.records() {
            let Ok(record) = record else {
                self.skipped += 1;
                continue;
            };
            match trip_speed(&record) {
                Ok(trip) => {
                    self.sums[trip.weekday] += trip.speed;
                    self.counts[trip.weekday] += 1;
                }
                Err(reason) => {
                    trace!("Skipping row ({:?}): {:?}", reason, record);
                    self.skipped += 1;
                }
            }
        }
    }

    pub fn trips(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Mean speed per day, 0 for days without trips
    pub fn finish(&self) -> DayAggregate {
        let mut averages = [0.0; 7];
        for (day, average) in averages.iter_mut().enumerate() {
            if self.counts[day] > 0 {
                *average = self.sums[day] / self.counts[day] as f64;
            }
        }
        DayAggregate(averages)
    }
}

/// Aggregate an in-memory object
pub fn map_bytes(content: &[u8]) -> DayAggregate {
    let mut accumulator = SpeedAccumulator::new();
    accumulator.feed(content);
    accumulator.finish()
}

/// Aggregate a streamed object, holding at most one partial line between chunks
pub async fn map_stream(locator: &str, mut stream: ByteStream) -> MapReduceResult<SpeedAccumulator> {
    let mut accumulator = SpeedAccumulator::new();
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| MapReduceError::MapperTransport {
            locator: locator.to_string(),
            source,
        })?;
        // Only the new bytes can hold a newline the buffer didn't have
        let offset = pending.len();
        pending.extend_from_slice(&chunk);

        if let Some(last_newline) = chunk.iter().rposition(|byte| *byte == b'\n') {
            let tail = pending.split_off(offset + last_newline + 1);
            accumulator.feed(&pending);
            pending = tail;
        }
    }

    // Final line without a trailing newline
    accumulator.feed(&pending);
    Ok(accumulator)
}
