//! Wire codec for the point query protocol.
//!
//! Requests and responses are newline-terminated ASCII with tab-delimited
//! response fields:
//!
//! ```text
//! poll\n1\n<point>\n           ->  <point>\t<hexBat>\t<value>\n
//! poll2\n1\n<point>\n          ->  <point>\t<hexBat>\t<value>\t<units>\t<ok>\n
//! since\n0x<hexBat>\t<point>\n ->  multi-record text, returned raw
//! ```
//!
//! Responses are recognised structurally: the substring `0x` marks the
//! presence of a timestamp field. Server diagnostics such as
//! `? Named point doesn't exist` carry no marker and decode to an error.
//!
//! Point names travel unescaped, so a name containing the tab or newline
//! delimiters would corrupt the frame; encoding rejects such names.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::Bat;

/// Capacity bound for a raw or decoded response, in bytes.
///
/// Responses longer than this are truncated at the transport read; the
/// stored raw message is exactly what was consumed.
pub const RESPONSE_CAPACITY: usize = 255;

/// Substring marking the timestamp field of a decodable response.
const TIMESTAMP_MARKER: &str = "0x";

/// How numeric value fields are parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueParsing {
    /// The whole value field must parse as a float.
    #[default]
    Strict,
    /// Parse the leading numeric prefix of the field; a field with no
    /// usable prefix yields `0.0`. Compatibility mode for servers that
    /// append annotations to the value field.
    Lenient,
}

/// Request encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Point names are sent unescaped; tab or newline would corrupt the
    /// frame.
    #[error("point name {0:?} contains a delimiter")]
    DelimiterInName(String),
}

/// Response decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The response bytes are not valid UTF-8.
    #[error("response is not valid UTF-8")]
    NotUtf8,
    /// No `0x` timestamp marker anywhere in the response; typically a
    /// server diagnostic line.
    #[error("response carries no 0x timestamp marker")]
    NoTimestampMarker,
    /// Fewer tab-delimited fields than the response shape requires.
    #[error("response is missing the {0} field")]
    MissingField(&'static str),
    /// The timestamp field is not unsigned 64-bit hex.
    #[error("timestamp field {0:?} is not unsigned 64-bit hex")]
    BadTimestamp(String),
    /// The value field is not a number (strict parsing only).
    #[error("value field {0:?} is not a number")]
    BadValue(String),
}

/// Most recent value of a point, as returned by a `poll` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub point: String,
    pub bat: Bat,
    pub value: f64,
}

/// A `poll2` reading: value plus units and the server's range-check token.
///
/// `units` and `ok` are opaque server tokens copied verbatim — fielded
/// servers send `true`/`false` for `ok`, but the codec does not interpret
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedReading {
    pub point: String,
    pub bat: Bat,
    pub value: f64,
    pub units: String,
    pub ok: String,
}

/// Builds a `poll` request for a single point.
///
/// # Errors
///
/// [`EncodeError::DelimiterInName`] if the name contains tab or newline.
pub fn encode_poll(point: &str) -> Result<String, EncodeError> {
    check_point_name(point)?;
    Ok(format!("poll\n1\n{point}\n"))
}

/// Builds a `poll2` request for a single point.
///
/// # Errors
///
/// [`EncodeError::DelimiterInName`] if the name contains tab or newline.
pub fn encode_poll2(point: &str) -> Result<String, EncodeError> {
    check_point_name(point)?;
    Ok(format!("poll2\n1\n{point}\n"))
}

/// Builds a `since` request: all records of `point` newer than `since`.
///
/// # Errors
///
/// [`EncodeError::DelimiterInName`] if the name contains tab or newline.
pub fn encode_since(point: &str, since: Bat) -> Result<String, EncodeError> {
    check_point_name(point)?;
    Ok(format!("since\n{since}\t{point}\n"))
}

/// Decodes the 3-field `poll` response shape.
///
/// The value field runs to the end of the line, so any trailing
/// tab-delimited text (for instance a `poll2` response fed through this
/// decoder) is absorbed into it rather than rejected structurally.
///
/// # Errors
///
/// One [`DecodeError`] per malformation; see the variant docs.
pub fn decode_poll(msg: &[u8], parsing: ValueParsing) -> Result<Reading, DecodeError> {
    let text = require_marked_text(msg)?;
    let (point, rest) = text
        .split_once('\t')
        .ok_or(DecodeError::MissingField("timestamp"))?;
    let (bat_text, rest) = rest
        .split_once('\t')
        .ok_or(DecodeError::MissingField("value"))?;
    Ok(Reading {
        point: point.to_owned(),
        bat: parse_bat(bat_text)?,
        value: parse_value(line_end(rest), parsing)?,
    })
}

/// Decodes the 5-field `poll2` response shape.
///
/// # Errors
///
/// One [`DecodeError`] per malformation; see the variant docs.
pub fn decode_poll2(msg: &[u8], parsing: ValueParsing) -> Result<DetailedReading, DecodeError> {
    let text = require_marked_text(msg)?;
    let (point, rest) = text
        .split_once('\t')
        .ok_or(DecodeError::MissingField("timestamp"))?;
    let (bat_text, rest) = rest
        .split_once('\t')
        .ok_or(DecodeError::MissingField("value"))?;
    let (value_text, rest) = rest
        .split_once('\t')
        .ok_or(DecodeError::MissingField("units"))?;
    let (units, rest) = rest
        .split_once('\t')
        .ok_or(DecodeError::MissingField("ok"))?;
    Ok(DetailedReading {
        point: point.to_owned(),
        bat: parse_bat(bat_text)?,
        value: parse_value(value_text, parsing)?,
        units: units.to_owned(),
        ok: line_end(rest).to_owned(),
    })
}

fn check_point_name(point: &str) -> Result<(), EncodeError> {
    if point.contains(['\t', '\n']) {
        return Err(EncodeError::DelimiterInName(point.to_owned()));
    }
    Ok(())
}

fn require_marked_text(msg: &[u8]) -> Result<&str, DecodeError> {
    let text = std::str::from_utf8(msg).map_err(|_| DecodeError::NotUtf8)?;
    if !text.contains(TIMESTAMP_MARKER) {
        return Err(DecodeError::NoTimestampMarker);
    }
    Ok(text)
}

/// Truncates a field at the end of its line.
fn line_end(field: &str) -> &str {
    let field = &field[..field.find('\n').unwrap_or(field.len())];
    field.strip_suffix('\r').unwrap_or(field)
}

fn parse_bat(text: &str) -> Result<Bat, DecodeError> {
    Bat::from_hex(text.trim()).map_err(|_| DecodeError::BadTimestamp(text.to_owned()))
}

fn parse_value(text: &str, parsing: ValueParsing) -> Result<f64, DecodeError> {
    let trimmed = text.trim();
    match parsing {
        ValueParsing::Strict => trimmed
            .parse()
            .map_err(|_| DecodeError::BadValue(trimmed.to_owned())),
        ValueParsing::Lenient => Ok(leading_float(trimmed)),
    }
}

/// Numeric prefix of `text` as a float, `0.0` when nothing parses.
fn leading_float(text: &str) -> f64 {
    let end = text
        .find(|c: char| !matches!(c, '0'..='9' | '+' | '-' | '.' | 'e' | 'E'))
        .unwrap_or(text.len());
    text[..end].parse().unwrap_or(0.0)
}
