//! Wire Codec
//!
//! Framing and serialization shared by the ingest handlers and the
//! destination drain loop.
//!
//! - Frames are `[u32 big-endian length][payload]`, both inbound (pickle
//!   protocol) and outbound (every backend write).
//! - Lines are `<metric> <value> <timestamp>\n`.
//! - Batches are pickled lists of `(metric, (timestamp, value))` tuples.

use crate::domain::entities::{Datum, Sample};
use bytes::{BufMut, Bytes, BytesMut};
use serde_pickle::{DeOptions, SerOptions, Value};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest accepted inbound frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Largest accepted inbound line, newline excluded.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    #[error("connection closed in the middle of a frame")]
    Truncated,
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
    #[error("malformed line: {0:?}")]
    BadLine(String),
    #[error("malformed batch: {0}")]
    BadBatch(String),
    #[error("pickle error: {0}")]
    Pickle(#[from] serde_pickle::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

// ==================== Framing ====================

/// Encode a payload as one length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a length from the first 4 bytes.
pub fn decode_length(buf: &[u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(*buf)
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closes cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Bytes>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(CodecError::Truncated)
            };
        }
        filled += n;
    }

    let len = decode_length(&header) as usize;
    if len > max_len {
        return Err(CodecError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CodecError::Truncated,
        _ => CodecError::Io(e),
    })?;

    Ok(Some(Bytes::from(payload)))
}

/// Write one frame with a single `write_all`.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await
}

// ==================== Line protocol ====================

/// Read one newline-terminated line into `buf` (newline included).
///
/// Returns `Ok(false)` at end of stream. A trailing line without its
/// newline is discarded.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> Result<bool, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = max_len as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        return Ok(true);
    }
    if buf.len() as u64 >= limit {
        return Err(CodecError::LineTooLong(max_len));
    }
    tracing::debug!("discarding {} bytes of unterminated trailing line", buf.len());
    buf.clear();
    Ok(false)
}

/// Parse `<metric> <value> <timestamp>` into a sample.
///
/// Fields after the timestamp are ignored.
pub fn parse_line(line: &[u8]) -> Result<Sample, CodecError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| CodecError::BadLine(String::from_utf8_lossy(line).into_owned()))?;
    let bad = || CodecError::BadLine(text.trim().to_string());

    let mut fields = text.split_whitespace();
    let metric = fields.next().ok_or_else(bad)?;
    let value = fields.next().ok_or_else(bad)?;
    let timestamp = fields.next().ok_or_else(bad)?;

    let value: f64 = value.parse().map_err(|_| bad())?;
    let timestamp: f64 = timestamp.parse().map_err(|_| bad())?;

    Ok(Sample::new(metric, timestamp, value))
}

// ==================== Pickle batches ====================

/// Serialize samples as a pickled list of `(metric, (timestamp, value))`.
///
/// Protocol 2 keeps the output readable by both Python 2 and 3 receivers.
/// Timestamps and values keep the pickle type they were decoded with.
pub fn encode_samples(samples: &[Sample]) -> Result<Bytes, CodecError> {
    let tuples = samples
        .iter()
        .map(|s| {
            let datapoint = Value::Tuple(vec![s.timestamp.to_value(), s.value.to_value()]);
            Value::Tuple(vec![Value::String(s.metric.clone()), datapoint])
        })
        .collect();
    let data = serde_pickle::value_to_vec(&Value::List(tuples), SerOptions::new().proto_v2())?;
    Ok(Bytes::from(data))
}

/// Decode a pickled batch into samples, preserving order.
pub fn decode_samples(payload: &[u8]) -> Result<Vec<Sample>, CodecError> {
    let value = serde_pickle::value_from_slice(payload, DeOptions::new().decode_strings())?;
    let items = match value {
        Value::List(items) | Value::Tuple(items) => items,
        other => {
            return Err(CodecError::BadBatch(format!(
                "expected a sequence of samples, got {}",
                describe(&other)
            )))
        }
    };

    items.into_iter().map(sample_from_value).collect()
}

fn sample_from_value(value: Value) -> Result<Sample, CodecError> {
    let [metric, datapoint] = into_pair(value)?;
    let metric = match metric {
        Value::String(s) => s,
        Value::Bytes(b) => String::from_utf8(b)
            .map_err(|_| CodecError::BadBatch("metric name is not utf-8".to_string()))?,
        other => {
            return Err(CodecError::BadBatch(format!(
                "metric name must be a string, got {}",
                describe(&other)
            )))
        }
    };
    let [timestamp, value] = into_pair(datapoint)?;

    Ok(Sample::new(metric, datum(timestamp)?, datum(value)?))
}

fn into_pair(value: Value) -> Result<[Value; 2], CodecError> {
    match value {
        Value::List(items) | Value::Tuple(items) => {
            let len = items.len();
            items
                .try_into()
                .map_err(|_| CodecError::BadBatch(format!("expected a pair, got {} items", len)))
        }
        other => Err(CodecError::BadBatch(format!(
            "expected a pair, got {}",
            describe(&other)
        ))),
    }
}

fn datum(value: Value) -> Result<Datum, CodecError> {
    match value {
        Value::I64(i) => Ok(Datum::Int(i)),
        Value::F64(f) => Ok(Datum::Float(f)),
        Value::Int(_) => Ok(Datum::Raw(value)),
        Value::String(s) => numeric_text(s).map(|s| Datum::Raw(Value::String(s))),
        Value::Bytes(b) => String::from_utf8(b)
            .map_err(|_| CodecError::BadBatch("not a number".to_string()))
            .and_then(numeric_text)
            .map(|s| Datum::Raw(Value::String(s))),
        other => Err(CodecError::BadBatch(format!(
            "expected a number, got {}",
            describe(&other)
        ))),
    }
}

/// Numeric strings are forwarded untouched; anything else is refused here
/// rather than by the backend.
fn numeric_text(s: String) -> Result<String, CodecError> {
    match s.trim().parse::<f64>() {
        Ok(_) => Ok(s),
        Err(_) => Err(CodecError::BadBatch(format!("not a number: {:?}", s))),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::None => "None",
        Value::Bool(_) => "bool",
        Value::I64(_) | Value::Int(_) => "int",
        Value::F64(_) => "float",
        Value::Bytes(_) => "bytes",
        Value::String(_) => "str",
        Value::List(_) => "list",
        Value::Tuple(_) => "tuple",
        Value::Set(_) | Value::FrozenSet(_) => "set",
        Value::Dict(_) => "dict",
        #[allow(unreachable_patterns)]
        _ => "object",
    }
}
