//! Domain Entities - Core relay objects
//!
//! Samples and per-destination batches. Both are transient: built for one
//! inbound line or frame and consumed before the next one is read.

use crate::domain::value_objects::DestinationKey;
use serde_pickle::Value;
use std::collections::BTreeMap;

/// A timestamp or value as the producer sent it.
///
/// Relayed samples are re-emitted with the same numeric type they arrived
/// with, so an integer never turns into a float on its way to a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Int(i64),
    Float(f64),
    /// Integers wider than 64 bits and numeric strings, passed through as is.
    Raw(Value),
}

impl Datum {
    /// Pickle value written to backends.
    pub fn to_value(&self) -> Value {
        match self {
            Datum::Int(i) => Value::I64(*i),
            Datum::Float(f) => Value::F64(*f),
            Datum::Raw(v) => v.clone(),
        }
    }
}

impl From<i64> for Datum {
    fn from(i: i64) -> Self {
        Datum::Int(i)
    }
}

impl From<f64> for Datum {
    fn from(f: f64) -> Self {
        Datum::Float(f)
    }
}

/// One time-series datapoint.
///
/// Internally and on the backend wire a sample is always
/// `(metric, (timestamp, value))`, whatever order the producer used.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Dotted metric path
    pub metric: String,
    /// Seconds since the epoch, as sent by the producer
    pub timestamp: Datum,
    /// Datapoint value
    pub value: Datum,
}

impl Sample {
    pub fn new(metric: impl Into<String>, timestamp: impl Into<Datum>, value: impl Into<Datum>) -> Self {
        Self {
            metric: metric.into(),
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }
}

/// Samples grouped by the destination they must be sent to.
///
/// Ordered by key so that dispatch order is stable; the relative order of
/// samples inside one destination's list is the order they were read in.
pub type Batches = BTreeMap<DestinationKey, Vec<Sample>>;
