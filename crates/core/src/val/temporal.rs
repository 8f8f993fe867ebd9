use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::err::EvalErrorKind;

/// The number of nanoseconds in one second.
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A calendar date as a day count since 1970-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
	days: i64,
}

impl Date {
	/// Build a date from a day count since the epoch.
	pub fn from_days(days: i64) -> Self {
		Self {
			days,
		}
	}

	/// Build a date from a year, month and day triple.
	pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, EvalErrorKind> {
		let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(EvalErrorKind::Format)?;
		let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
		Ok(Self {
			days: (date - epoch).num_days(),
		})
	}

	/// Parse a canonical `YYYY-MM-DD` literal.
	pub fn parse(text: &str) -> Result<Self, EvalErrorKind> {
		let date =
			NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|_| EvalErrorKind::Format)?;
		Self::from_ymd(date.year(), date.month(), date.day())
	}

	/// The day count since the epoch.
	pub fn days(&self) -> i64 {
		self.days
	}

	fn to_naive(self) -> Option<NaiveDate> {
		let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
		epoch.checked_add_signed(chrono::Duration::days(self.days))
	}
}

impl std::fmt::Display for Date {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.to_naive() {
			Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
			None => write!(f, "<date out of range>"),
		}
	}
}

/// A time of day as nanoseconds since midnight, optionally carrying a
/// zone offset in minutes. The stored instant is normalised to UTC;
/// the offset is retained for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeOfDay {
	nanos: u64,
	offset_minutes: Option<i16>,
}

impl TimeOfDay {
	/// Build a time of day from nanoseconds since midnight.
	pub fn from_nanos(nanos: u64) -> Self {
		Self {
			nanos: nanos % (24 * 60 * 60 * NANOS_PER_SEC),
			offset_minutes: None,
		}
	}

	/// Attach a zone offset, normalising the stored instant to UTC.
	pub fn with_offset(nanos_local: u64, offset_minutes: i16) -> Self {
		let day = 24 * 60 * 60 * NANOS_PER_SEC;
		let shift = (offset_minutes as i64) * 60 * NANOS_PER_SEC as i64;
		let utc = (nanos_local as i64 - shift).rem_euclid(day as i64) as u64;
		Self {
			nanos: utc,
			offset_minutes: Some(offset_minutes),
		}
	}

	/// Parse a canonical `HH:MM:SS[.fff][±HH:MM]` literal.
	pub fn parse(text: &str) -> Result<Self, EvalErrorKind> {
		let text = text.trim();
		let (body, offset) = split_offset(text);
		let time = NaiveTime::parse_from_str(body, "%H:%M:%S%.f")
			.or_else(|_| NaiveTime::parse_from_str(body, "%H:%M:%S"))
			.map_err(|_| EvalErrorKind::Format)?;
		let nanos =
			time.num_seconds_from_midnight() as u64 * NANOS_PER_SEC + time.nanosecond() as u64;
		match offset {
			Some(minutes) => Ok(Self::with_offset(nanos, minutes)),
			None => Ok(Self::from_nanos(nanos)),
		}
	}

	/// Nanoseconds since UTC midnight.
	pub fn nanos(&self) -> u64 {
		self.nanos
	}

	/// The zone offset in minutes, when the value is zone aware.
	pub fn offset_minutes(&self) -> Option<i16> {
		self.offset_minutes
	}

	/// Whether the value carries a zone offset.
	pub fn has_offset(&self) -> bool {
		self.offset_minutes.is_some()
	}
}

impl PartialOrd for TimeOfDay {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for TimeOfDay {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		// Comparison is on the normalised UTC instant
		self.nanos.cmp(&other.nanos)
	}
}

impl std::fmt::Display for TimeOfDay {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let local = match self.offset_minutes {
			Some(offset) => {
				let day = 24 * 60 * 60 * NANOS_PER_SEC;
				((self.nanos as i64 + offset as i64 * 60 * NANOS_PER_SEC as i64)
					.rem_euclid(day as i64)) as u64
			}
			None => self.nanos,
		};
		let secs = local / NANOS_PER_SEC;
		let sub = local % NANOS_PER_SEC;
		write!(f, "{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)?;
		if sub != 0 {
			write!(f, ".{:09}", sub)?;
		}
		if let Some(offset) = self.offset_minutes {
			write_offset(f, offset)?;
		}
		Ok(())
	}
}

/// A point in time as seconds and subsecond nanoseconds since the
/// epoch, optionally zone aware. The stored instant is UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimePoint {
	seconds: i64,
	nanos: u32,
	offset_minutes: Option<i16>,
}

impl TimePoint {
	/// Build a time point from an epoch second count and subsecond
	/// nanoseconds.
	pub fn new(seconds: i64, nanos: u32) -> Self {
		Self {
			seconds: seconds + (nanos / NANOS_PER_SEC as u32) as i64,
			nanos: nanos % NANOS_PER_SEC as u32,
			offset_minutes: None,
		}
	}

	/// Attach a zone offset to an instant already normalised to UTC.
	pub fn with_offset(seconds_utc: i64, nanos: u32, offset_minutes: i16) -> Self {
		let mut v = Self::new(seconds_utc, nanos);
		v.offset_minutes = Some(offset_minutes);
		v
	}

	/// Parse a canonical `YYYY-MM-DD HH:MM:SS[.fff][±HH:MM]` literal.
	/// A `T` separator is accepted as well.
	pub fn parse(text: &str) -> Result<Self, EvalErrorKind> {
		let text = text.trim().replacen('T', " ", 1);
		let (body, offset) = split_offset(&text);
		let dt = NaiveDateTime::parse_from_str(body, "%Y-%m-%d %H:%M:%S%.f")
			.or_else(|_| NaiveDateTime::parse_from_str(body, "%Y-%m-%d %H:%M:%S"))
			.map_err(|_| EvalErrorKind::Format)?;
		let local_seconds = dt.and_utc().timestamp();
		let nanos = dt.and_utc().timestamp_subsec_nanos();
		match offset {
			Some(minutes) => {
				Ok(Self::with_offset(local_seconds - minutes as i64 * 60, nanos, minutes))
			}
			None => Ok(Self::new(local_seconds, nanos)),
		}
	}

	/// Epoch seconds of the UTC instant.
	pub fn seconds(&self) -> i64 {
		self.seconds
	}

	/// Subsecond nanoseconds.
	pub fn nanos(&self) -> u32 {
		self.nanos
	}

	/// The zone offset in minutes, when the value is zone aware.
	pub fn offset_minutes(&self) -> Option<i16> {
		self.offset_minutes
	}

	/// Whether the value carries a zone offset.
	pub fn has_offset(&self) -> bool {
		self.offset_minutes.is_some()
	}

	/// The calendar date of the UTC instant.
	pub fn date(&self) -> Date {
		Date::from_days(self.seconds.div_euclid(24 * 60 * 60))
	}

	/// The time of day of the UTC instant.
	pub fn time_of_day(&self) -> TimeOfDay {
		let within = self.seconds.rem_euclid(24 * 60 * 60) as u64;
		TimeOfDay::from_nanos(within * NANOS_PER_SEC + self.nanos as u64)
	}
}

impl PartialOrd for TimePoint {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for TimePoint {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		// Comparison is on the normalised UTC instant
		(self.seconds, self.nanos).cmp(&(other.seconds, other.nanos))
	}
}

impl std::fmt::Display for TimePoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let offset = self.offset_minutes.unwrap_or(0);
		let local = self.seconds + offset as i64 * 60;
		let date = Date::from_days(local.div_euclid(24 * 60 * 60));
		let within = local.rem_euclid(24 * 60 * 60);
		write!(f, "{} {:02}:{:02}:{:02}", date, within / 3600, (within / 60) % 60, within % 60)?;
		if self.nanos != 0 {
			write!(f, ".{:09}", self.nanos)?;
		}
		if let Some(offset) = self.offset_minutes {
			write_offset(f, offset)?;
		}
		Ok(())
	}
}

/// Split a trailing `±HH:MM` or `Z` zone suffix off a temporal
/// literal, returning the body and the offset in minutes.
fn split_offset(text: &str) -> (&str, Option<i16>) {
	if let Some(body) = text.strip_suffix('Z') {
		return (body, Some(0));
	}
	// An offset suffix has a sign at len-6: "...±HH:MM"
	if text.len() > 6 {
		let at = text.len() - 6;
		let bytes = text.as_bytes();
		if (bytes[at] == b'+' || bytes[at] == b'-') && bytes[at + 3] == b':' {
			let sign = if bytes[at] == b'-' {
				-1i16
			} else {
				1i16
			};
			let hours = text[at + 1..at + 3].parse::<i16>().ok();
			let minutes = text[at + 4..].parse::<i16>().ok();
			if let (Some(h), Some(m)) = (hours, minutes) {
				return (&text[..at], Some(sign * (h * 60 + m)));
			}
		}
	}
	(text, None)
}

fn write_offset(f: &mut std::fmt::Formatter<'_>, offset: i16) -> std::fmt::Result {
	let sign = if offset < 0 {
		'-'
	} else {
		'+'
	};
	let abs = offset.unsigned_abs();
	write!(f, "{}{:02}:{:02}", sign, abs / 60, abs % 60)
}
