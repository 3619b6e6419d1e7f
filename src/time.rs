//! BAT timestamps and calendar conversion.
//!
//! Every reading the server returns is stamped with a BAT: an unsigned
//! 64-bit count of microseconds since the Modified Julian Day epoch,
//! 1858-11-17T00:00:00 UTC. BATs tick atomic time, so converting one to
//! civil time needs the accumulated leap-second correction (dUTC), which
//! callers obtain out-of-band — typically by polling the server's own
//! clock offset point.
//!
//! Conversion contract: [`Bat::from_human`] reads its input as UTC civil
//! time and is the exact inverse of [`Bat::to_human`] with
//! `tz_offset_hours == 0`. The forward direction's hour offset is a flat
//! display shift with no DST rules.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::warn;

/// Seconds between the MJD epoch (1858-11-17) and the Unix epoch.
///
/// 40587 is the MJD day number of 1970-01-01.
pub const MJD_UNIX_EPOCH_SECS: i64 = 40587 * 86400;

/// Microseconds per second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Smallest leap-second offset the library considers plausible.
///
/// dUTC passed 30 seconds in the 1990s; a smaller value usually means the
/// caller mixed up units or signs. Conversion proceeds with a diagnostic.
pub const MIN_EXPECTED_DUTC: i32 = 30;

/// Exact length of the date text accepted by [`Bat::from_human`].
const DATE_TEXT_LEN: usize = "DD/MM/YYYY".len();

/// Timestamp conversion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// Date text is not exactly 10 characters of `DD/MM/YYYY`.
    #[error("date must be exactly 10 characters in DD/MM/YYYY form")]
    BadDateFormat,
    /// Time text is not `HH:MM:SS.ffffff`.
    #[error("time must be in HH:MM:SS.ffffff form")]
    BadTimeFormat,
    /// A calendar field did not parse as a number.
    #[error("calendar field is not a number")]
    BadNumber,
    /// The fields parsed but name no real date or time.
    #[error("calendar fields do not name a valid date or time")]
    BadDate,
    /// The instant falls outside the representable range.
    #[error("timestamp is outside the representable range")]
    OutOfRange,
}

/// Microsecond count since the MJD epoch.
///
/// Wire format is unsigned 64-bit hexadecimal with an `0x` prefix, which
/// is also how a `Bat` displays.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Bat(u64);

impl Bat {
    /// Creates a BAT from a raw microsecond count.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Returns the raw microsecond count.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Parses the wire representation: unsigned 64-bit hex, `0x` prefix
    /// optional.
    ///
    /// # Errors
    ///
    /// Returns the underlying integer parse error for non-hex input.
    pub fn from_hex(text: &str) -> Result<Self, std::num::ParseIntError> {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        u64::from_str_radix(digits, 16).map(Self)
    }

    /// Converts to civil time.
    ///
    /// `dutc` is subtracted to move from atomic to UTC seconds, then the
    /// value is rebased from the MJD epoch onto the Unix epoch and
    /// decomposed with UTC calendar rules. `tz_offset_hours` is applied
    /// as a flat shift — no timezone database, no DST.
    ///
    /// # Errors
    ///
    /// [`ConvertError::OutOfRange`] when the shifted instant falls outside
    /// the representable calendar range.
    pub fn to_human(self, dutc: i32, tz_offset_hours: i32) -> Result<HumanTime, ConvertError> {
        if dutc < MIN_EXPECTED_DUTC {
            warn!("dUTC {dutc} is below the expected leap-second range");
        }

        let frac = (self.0 % MICROS_PER_SEC) as u32;
        let whole_secs = (self.0 / MICROS_PER_SEC) as i64;
        let unix_secs = whole_secs - i64::from(dutc) - MJD_UNIX_EPOCH_SECS
            + i64::from(tz_offset_hours) * 3600;

        let utc = DateTime::<Utc>::from_timestamp(unix_secs, 0).ok_or(ConvertError::OutOfRange)?;
        Ok(HumanTime {
            year: utc.year(),
            month: utc.month(),
            day: utc.day(),
            hour: utc.hour(),
            minute: utc.minute(),
            second: utc.second(),
            microsecond: frac,
        })
    }

    /// Composes a BAT from civil time text.
    ///
    /// `date` must be exactly `DD/MM/YYYY`; `time` must be
    /// `HH:MM:SS.ffffff` (shorter fractions scale, e.g. `.5` is half a
    /// second). The input is read as UTC civil time, making this the
    /// inverse of [`to_human`](Self::to_human) with a zero hour offset.
    ///
    /// # Errors
    ///
    /// One [`ConvertError`] per malformation; see the variant docs.
    pub fn from_human(date: &str, time: &str, dutc: i32) -> Result<Self, ConvertError> {
        let (day, month, year) = parse_date(date)?;
        let (hour, minute, second, micros) = parse_time(time)?;

        let civil = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .ok_or(ConvertError::BadDate)?;

        let mjd_secs = civil.and_utc().timestamp() + MJD_UNIX_EPOCH_SECS + i64::from(dutc);
        let secs = u64::try_from(mjd_secs).map_err(|_| ConvertError::OutOfRange)?;
        secs.checked_mul(MICROS_PER_SEC)
            .and_then(|us| us.checked_add(u64::from(micros)))
            .map(Self)
            .ok_or(ConvertError::OutOfRange)
    }
}

impl From<u64> for Bat {
    fn from(micros: u64) -> Self {
        Self(micros)
    }
}

impl From<Bat> for u64 {
    fn from(bat: Bat) -> Self {
        bat.0
    }
}

impl fmt::Display for Bat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// A BAT decomposed into calendar fields.
///
/// Displays as `DD/MM/YYYY HH:MM:SS.ffffff`; the two halves are available
/// separately in exactly the formats [`Bat::from_human`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanTime {
    pub year: i32,
    /// 1-12.
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Microsecond of second.
    pub microsecond: u32,
}

impl HumanTime {
    /// The date half, `DD/MM/YYYY`.
    #[must_use]
    pub fn date_string(&self) -> String {
        format!("{:02}/{:02}/{:04}", self.day, self.month, self.year)
    }

    /// The time half, `HH:MM:SS.ffffff`.
    #[must_use]
    pub fn time_string(&self) -> String {
        format!(
            "{:02}:{:02}:{:02}.{:06}",
            self.hour, self.minute, self.second, self.microsecond
        )
    }
}

impl fmt::Display for HumanTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date_string(), self.time_string())
    }
}

fn parse_date(date: &str) -> Result<(u32, u32, i32), ConvertError> {
    if date.len() != DATE_TEXT_LEN {
        return Err(ConvertError::BadDateFormat);
    }
    let mut fields = date.split('/');
    let mut next = || fields.next().ok_or(ConvertError::BadDateFormat);
    let day = parse_num(next()?)?;
    let month = parse_num(next()?)?;
    let year = parse_num(next()?)?;
    Ok((day, month, year))
}

fn parse_time(time: &str) -> Result<(u32, u32, u32, u32), ConvertError> {
    if !time.contains(':') || !time.contains('.') {
        return Err(ConvertError::BadTimeFormat);
    }
    let (clock, frac) = time.split_once('.').ok_or(ConvertError::BadTimeFormat)?;
    let mut fields = clock.split(':');
    let mut next = || fields.next().ok_or(ConvertError::BadTimeFormat);
    let hour = parse_num(next()?)?;
    let minute = parse_num(next()?)?;
    let second = parse_num(next()?)?;
    Ok((hour, minute, second, parse_micros(frac)?))
}

fn parse_num<T: std::str::FromStr>(text: &str) -> Result<T, ConvertError> {
    text.parse().map_err(|_| ConvertError::BadNumber)
}

/// Scales a fractional-second field to microseconds. Digits beyond
/// microsecond precision are dropped.
fn parse_micros(frac: &str) -> Result<u32, ConvertError> {
    let digits = frac.get(..frac.len().min(6)).ok_or(ConvertError::BadNumber)?;
    let value: u32 = digits.parse().map_err(|_| ConvertError::BadNumber)?;
    Ok(value * 10u32.pow(6 - digits.len() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_rebases_onto_mjd() {
        let bat = Bat::from_human("01/01/1970", "00:00:00.000000", 0).unwrap();
        assert_eq!(bat.as_u64(), 40587 * 86400 * 1_000_000);
    }

    #[test]
    fn known_instant_composes_and_inverts() {
        let bat = Bat::from_human("10/12/2010", "14:27:12.229100", 34).unwrap();
        assert_ne!(bat.as_u64(), 0);

        let human = bat.to_human(34, 0).unwrap();
        assert_eq!(human.date_string(), "10/12/2010");
        assert_eq!(human.time_string(), "14:27:12.229100");
    }

    #[test]
    fn short_date_is_rejected() {
        assert_eq!(
            Bat::from_human("1/1/2010", "14:27:12.229100", 34),
            Err(ConvertError::BadDateFormat)
        );
    }

    #[test]
    fn time_without_colon_or_dot_is_rejected() {
        assert_eq!(
            Bat::from_human("10/12/2010", "142712.2291", 34),
            Err(ConvertError::BadTimeFormat)
        );
        assert_eq!(
            Bat::from_human("10/12/2010", "14:27:12", 34),
            Err(ConvertError::BadTimeFormat)
        );
    }

    #[test]
    fn nonsense_fields_are_rejected() {
        assert_eq!(
            Bat::from_human("aa/12/2010", "14:27:12.0", 34),
            Err(ConvertError::BadNumber)
        );
        assert_eq!(
            Bat::from_human("31/02/2010", "14:27:12.0", 34),
            Err(ConvertError::BadDate)
        );
        assert_eq!(
            Bat::from_human("10/12/2010", "25:00:00.0", 34),
            Err(ConvertError::BadDate)
        );
    }

    #[test]
    fn roundtrip_across_years_and_offsets() {
        for dutc in [30, 34, 37] {
            for (date, time) in [
                ("17/11/1858", "00:00:00.000000"),
                ("01/01/1970", "00:00:00.000001"),
                ("29/02/2004", "23:59:59.999999"),
                ("10/12/2010", "14:27:12.229100"),
                ("30/06/2035", "06:30:00.500000"),
            ] {
                let bat = Bat::from_human(date, time, dutc).unwrap();
                let human = bat.to_human(dutc, 0).unwrap();
                assert_eq!(human.date_string(), date, "dutc {dutc}");
                assert_eq!(human.time_string(), time, "dutc {dutc}");
                assert_eq!(
                    Bat::from_human(&human.date_string(), &human.time_string(), dutc),
                    Ok(bat)
                );
            }
        }
    }

    #[test]
    fn timezone_offset_is_a_flat_shift() {
        let bat = Bat::from_human("10/12/2010", "14:27:12.000000", 34).unwrap();
        let shifted = bat.to_human(34, 11).unwrap();
        assert_eq!(shifted.date_string(), "11/12/2010");
        assert_eq!(shifted.time_string(), "01:27:12.000000");
    }

    #[test]
    fn short_fraction_scales_to_micros() {
        let bat = Bat::from_human("01/01/1970", "00:00:00.5", 0).unwrap();
        assert_eq!(bat.as_u64() % MICROS_PER_SEC, 500_000);
    }

    #[test]
    fn hex_parses_with_and_without_prefix() {
        assert_eq!(Bat::from_hex("0x2400a1b2c3").unwrap().as_u64(), 0x2400a1b2c3);
        assert_eq!(Bat::from_hex("2400a1b2c3").unwrap().as_u64(), 0x2400a1b2c3);
        assert!(Bat::from_hex("zz").is_err());
    }

    #[test]
    fn displays_as_hex_wire_form() {
        assert_eq!(Bat::from_micros(0x2400a1b2c3).to_string(), "0x2400a1b2c3");
    }

    #[test]
    fn pre_unix_epoch_times_convert() {
        let bat = Bat::from_human("01/01/1900", "12:00:00.000000", 30).unwrap();
        let human = bat.to_human(30, 0).unwrap();
        assert_eq!(human.year, 1900);
        assert_eq!(human.hour, 12);
    }

    #[test]
    fn pre_mjd_epoch_is_out_of_range() {
        assert_eq!(
            Bat::from_human("01/01/1850", "00:00:00.000000", 0),
            Err(ConvertError::OutOfRange)
        );
    }
}
