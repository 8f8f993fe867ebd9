//! Cast semantics across the runtime types.
//!
//! The conversion matrix is a pair-table lookup: a source/target pair
//! is either lossless, allowed with possible loss under the selected
//! loss policy, or rejected outright. Character casts parse canonical
//! literals; fixed-length character targets pad with spaces and fixed
//! octet targets pad with NULs; truncation is an error unless the
//! lenient policy is set.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::err::EvalErrorKind;
use crate::mem::Arena;
use crate::val::number::enforce_precision;
use crate::val::{Date, Octet, Text, TimeOfDay, TimePoint, Value};

/// What to do when a conversion may lose information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossPolicy {
	/// Silently accept the loss
	Ignore,
	/// Log a warning and accept the loss
	Warn,
	/// Reject the conversion
	Error,
}

/// The target of a cast, including the type options that shape the
/// conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastTarget {
	Bool,
	Int4,
	Int8,
	Float4,
	Float8,
	Decimal {
		precision: Option<u8>,
		scale: Option<u8>,
	},
	Character {
		varying: bool,
		length: Option<u32>,
	},
	Octet {
		varying: bool,
		length: Option<u32>,
	},
	Date,
	TimeOfDay {
		with_offset: bool,
	},
	TimePoint {
		with_offset: bool,
	},
}

/// Everything a cast needs from its surroundings: an arena for any
/// varlen result, the loss and truncation policies, and the global
/// zone offset applied when a zoneless value meets a zoned target.
pub struct CastContext<'a> {
	pub arena: &'a Arena,
	pub loss_policy: LossPolicy,
	pub lenient: bool,
	pub zone_offset_minutes: i16,
}

impl<'a> CastContext<'a> {
	/// A context with the default policies.
	pub fn new(arena: &'a Arena) -> Self {
		Self {
			arena,
			loss_policy: LossPolicy::Error,
			lenient: false,
			zone_offset_minutes: 0,
		}
	}

	/// Resolve a possibly lossy step under the loss policy.
	fn lossy(&self, value: Value, lost: bool) -> Value {
		if !lost {
			return value;
		}
		match self.loss_policy {
			LossPolicy::Ignore => value,
			LossPolicy::Warn => {
				warn!("cast lost precision producing {value}");
				value
			}
			LossPolicy::Error => Value::Error(EvalErrorKind::LossOfPrecision),
		}
	}
}

/// Cast a value to a target type. Empty stays empty, errors pass
/// through unchanged, and unsupported pairs produce an error value.
pub fn cast(value: &Value, target: &CastTarget, ctx: &CastContext) -> Value {
	match value {
		Value::Error(kind) => Value::Error(*kind),
		Value::Empty => Value::Empty,
		Value::Bool(v) => cast_bool(*v, target, ctx),
		Value::Int4(v) => cast_int(*v as i64, true, target, ctx),
		Value::Int8(v) => cast_int(*v, false, target, ctx),
		Value::Float4(v) => cast_float(*v as f64, true, target, ctx),
		Value::Float8(v) => cast_float(*v, false, target, ctx),
		Value::Decimal(v) => cast_decimal(*v, target, ctx),
		Value::Text(v) => cast_text(v, target, ctx),
		Value::Octet(v) => cast_octet(v, target, ctx),
		Value::Date(v) => cast_date(*v, target, ctx),
		Value::TimeOfDay(v) => cast_time_of_day(*v, target, ctx),
		Value::TimePoint(v) => cast_time_point(*v, target, ctx),
		Value::Blob(_) | Value::Clob(_) => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_bool(v: bool, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::Bool => Value::Bool(v),
		CastTarget::Int4 => Value::Int4(v as i32),
		CastTarget::Int8 => Value::Int8(v as i64),
		CastTarget::Float4 => Value::Float4(v as u8 as f32),
		CastTarget::Float8 => Value::Float8(v as u8 as f64),
		CastTarget::Decimal {
			..
		} => Value::Decimal(Decimal::from(v as u8)),
		CastTarget::Character {
			..
		} => make_text(if v { "true" } else { "false" }, target, ctx),
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_int(v: i64, narrow_source: bool, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::Bool => ctx.lossy(Value::Bool(v != 0), !matches!(v, 0 | 1)),
		CastTarget::Int4 => match i32::try_from(v) {
			Ok(out) => Value::Int4(out),
			Err(_) => ctx.lossy(Value::Int4(v as i32), true),
		},
		CastTarget::Int8 => Value::Int8(v),
		CastTarget::Float4 => {
			let out = v as f32;
			ctx.lossy(Value::Float4(out), out as i64 != v)
		}
		CastTarget::Float8 => {
			let out = v as f64;
			let lost = !narrow_source && out as i64 != v;
			ctx.lossy(Value::Float8(out), lost)
		}
		CastTarget::Decimal {
			precision,
			scale,
		} => match enforce_precision(Decimal::from(v), *precision, *scale) {
			Ok(out) => Value::Decimal(out),
			Err(kind) => Value::Error(kind),
		},
		CastTarget::Character {
			..
		} => make_text(&v.to_string(), target, ctx),
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_float(v: f64, narrow_source: bool, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::Bool => ctx.lossy(Value::Bool(v != 0.0), v != 0.0 && v != 1.0),
		CastTarget::Int4 => {
			if v.is_finite() && v >= i32::MIN as f64 && v <= i32::MAX as f64 {
				ctx.lossy(Value::Int4(v.trunc() as i32), v.fract() != 0.0)
			} else {
				Value::Error(EvalErrorKind::Arithmetic)
			}
		}
		CastTarget::Int8 => {
			if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
				ctx.lossy(Value::Int8(v.trunc() as i64), v.fract() != 0.0)
			} else {
				Value::Error(EvalErrorKind::Arithmetic)
			}
		}
		CastTarget::Float4 => {
			let out = v as f32;
			let lost = !narrow_source && v.is_finite() && out as f64 != v;
			ctx.lossy(Value::Float4(out), lost)
		}
		CastTarget::Float8 => Value::Float8(v),
		CastTarget::Decimal {
			precision,
			scale,
		} => match Decimal::from_f64(v) {
			Some(d) => match enforce_precision(d, *precision, *scale) {
				Ok(out) => ctx.lossy(Value::Decimal(out), out.to_f64() != Some(v)),
				Err(kind) => Value::Error(kind),
			},
			None => Value::Error(EvalErrorKind::Arithmetic),
		},
		CastTarget::Character {
			..
		} => make_text(&format_float(v, narrow_source), target, ctx),
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_decimal(v: Decimal, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::Bool => ctx.lossy(Value::Bool(!v.is_zero()), !v.is_zero() && v != Decimal::ONE),
		CastTarget::Int4 => match v.trunc().to_i32() {
			Some(out) => ctx.lossy(Value::Int4(out), v.fract() != Decimal::ZERO),
			None => Value::Error(EvalErrorKind::Arithmetic),
		},
		CastTarget::Int8 => match v.trunc().to_i64() {
			Some(out) => ctx.lossy(Value::Int8(out), v.fract() != Decimal::ZERO),
			None => Value::Error(EvalErrorKind::Arithmetic),
		},
		CastTarget::Float4 => match v.to_f32() {
			Some(out) => ctx.lossy(Value::Float4(out), Decimal::from_f32(out) != Some(v)),
			None => Value::Error(EvalErrorKind::Arithmetic),
		},
		CastTarget::Float8 => match v.to_f64() {
			Some(out) => ctx.lossy(Value::Float8(out), Decimal::from_f64(out) != Some(v)),
			None => Value::Error(EvalErrorKind::Arithmetic),
		},
		CastTarget::Decimal {
			precision,
			scale,
		} => {
			let rounded = match enforce_precision(v, *precision, *scale) {
				Ok(out) => out,
				Err(kind) => return Value::Error(kind),
			};
			ctx.lossy(Value::Decimal(rounded), rounded != v)
		}
		CastTarget::Character {
			..
		} => make_text(&v.to_string(), target, ctx),
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_text(v: &Text, target: &CastTarget, ctx: &CastContext) -> Value {
	let s = v.as_str();
	let trimmed = s.trim();
	match target {
		CastTarget::Bool => match trimmed.to_ascii_lowercase().as_str() {
			"true" | "t" | "1" => Value::Bool(true),
			"false" | "f" | "0" => Value::Bool(false),
			_ => Value::Error(EvalErrorKind::Format),
		},
		CastTarget::Int4 => match trimmed.parse::<i32>() {
			Ok(out) => Value::Int4(out),
			Err(_) => Value::Error(EvalErrorKind::Format),
		},
		CastTarget::Int8 => match trimmed.parse::<i64>() {
			Ok(out) => Value::Int8(out),
			Err(_) => Value::Error(EvalErrorKind::Format),
		},
		CastTarget::Float4 => match trimmed.parse::<f32>() {
			Ok(out) => Value::Float4(out),
			Err(_) => Value::Error(EvalErrorKind::Format),
		},
		CastTarget::Float8 => match trimmed.parse::<f64>() {
			Ok(out) => Value::Float8(out),
			Err(_) => Value::Error(EvalErrorKind::Format),
		},
		CastTarget::Decimal {
			precision,
			scale,
		} => match trimmed.parse::<Decimal>() {
			Ok(d) => match enforce_precision(d, *precision, *scale) {
				Ok(out) => ctx.lossy(Value::Decimal(out), out != d),
				Err(kind) => Value::Error(kind),
			},
			Err(_) => Value::Error(EvalErrorKind::Format),
		},
		CastTarget::Character {
			..
		} => make_text(s, target, ctx),
		CastTarget::Octet {
			..
		} => match parse_hex(trimmed) {
			Some(bytes) => make_octet(&bytes, target, ctx),
			None => Value::Error(EvalErrorKind::Format),
		},
		CastTarget::Date => match Date::parse(trimmed) {
			Ok(out) => Value::Date(out),
			Err(kind) => Value::Error(kind),
		},
		CastTarget::TimeOfDay {
			with_offset,
		} => match TimeOfDay::parse(trimmed) {
			Ok(out) => Value::TimeOfDay(apply_tod_zone(out, *with_offset, ctx)),
			Err(kind) => Value::Error(kind),
		},
		CastTarget::TimePoint {
			with_offset,
		} => match TimePoint::parse(trimmed) {
			Ok(out) => Value::TimePoint(apply_tp_zone(out, *with_offset, ctx)),
			Err(kind) => Value::Error(kind),
		},
	}
}

fn cast_octet(v: &Octet, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::Octet {
			..
		} => make_octet(v.as_bytes(), target, ctx),
		CastTarget::Character {
			..
		} => {
			let mut hex = String::with_capacity(v.len() * 2);
			for b in v.as_bytes() {
				hex.push_str(&format!("{b:02x}"));
			}
			make_text(&hex, target, ctx)
		}
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_date(v: Date, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::Date => Value::Date(v),
		CastTarget::Character {
			..
		} => make_text(&v.to_string(), target, ctx),
		CastTarget::TimePoint {
			with_offset,
		} => {
			// Midnight of the date, in the configured zone for zoned
			// targets
			let seconds = v.days() * 24 * 60 * 60;
			let out = if *with_offset {
				let offset = ctx.zone_offset_minutes;
				TimePoint::with_offset(seconds - offset as i64 * 60, 0, offset)
			} else {
				TimePoint::new(seconds, 0)
			};
			ctx.lossy(Value::TimePoint(out), false)
		}
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_time_of_day(v: TimeOfDay, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::TimeOfDay {
			with_offset,
		} => Value::TimeOfDay(apply_tod_zone(v, *with_offset, ctx)),
		CastTarget::Character {
			..
		} => make_text(&v.to_string(), target, ctx),
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn cast_time_point(v: TimePoint, target: &CastTarget, ctx: &CastContext) -> Value {
	match target {
		CastTarget::TimePoint {
			with_offset,
		} => Value::TimePoint(apply_tp_zone(v, *with_offset, ctx)),
		CastTarget::Date => ctx.lossy(Value::Date(v.date()), true),
		CastTarget::TimeOfDay {
			with_offset,
		} => ctx.lossy(Value::TimeOfDay(apply_tod_zone(v.time_of_day(), *with_offset, ctx)), true),
		CastTarget::Character {
			..
		} => make_text(&v.to_string(), target, ctx),
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

/// Apply the configured global offset when a zoneless time meets a
/// zoned target, or strip the offset for a zoneless target.
fn apply_tod_zone(v: TimeOfDay, with_offset: bool, ctx: &CastContext) -> TimeOfDay {
	match (v.offset_minutes(), with_offset) {
		(None, true) => TimeOfDay::with_offset(v.nanos(), ctx.zone_offset_minutes),
		(Some(_), false) => TimeOfDay::from_nanos(v.nanos()),
		_ => v,
	}
}

fn apply_tp_zone(v: TimePoint, with_offset: bool, ctx: &CastContext) -> TimePoint {
	match (v.offset_minutes(), with_offset) {
		(None, true) => {
			let offset = ctx.zone_offset_minutes;
			TimePoint::with_offset(v.seconds() - offset as i64 * 60, v.nanos(), offset)
		}
		(Some(_), false) => TimePoint::new(v.seconds(), v.nanos()),
		_ => v,
	}
}

/// Build a character value honouring the target length options.
fn make_text(s: &str, target: &CastTarget, ctx: &CastContext) -> Value {
	let CastTarget::Character {
		varying,
		length,
	} = target
	else {
		return Value::Error(EvalErrorKind::UnsupportedCast);
	};
	let mut out = s.to_owned();
	if let Some(limit) = length {
		let limit = *limit as usize;
		if out.len() > limit {
			if !ctx.lenient {
				return Value::Error(EvalErrorKind::Truncation);
			}
			let mut cut = limit;
			while !out.is_char_boundary(cut) {
				cut -= 1;
			}
			out.truncate(cut);
		} else if !*varying {
			// Fixed length character pads with spaces
			out.extend(std::iter::repeat(' ').take(limit - out.len()));
		}
	}
	Value::Text(Text::new(&out, ctx.arena))
}

/// Build an octet value honouring the target length options.
fn make_octet(bytes: &[u8], target: &CastTarget, ctx: &CastContext) -> Value {
	let CastTarget::Octet {
		varying,
		length,
	} = target
	else {
		return Value::Error(EvalErrorKind::UnsupportedCast);
	};
	let mut out = bytes.to_vec();
	if let Some(limit) = length {
		let limit = *limit as usize;
		if out.len() > limit {
			if !ctx.lenient {
				return Value::Error(EvalErrorKind::Truncation);
			}
			out.truncate(limit);
		} else if !*varying {
			// Fixed length octet pads with NULs
			out.resize(limit, 0);
		}
	}
	Value::Octet(Octet::new(&out, ctx.arena))
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
	let s = s.strip_prefix("x'").and_then(|rest| rest.strip_suffix('\'')).unwrap_or(s);
	if s.len() % 2 != 0 {
		return None;
	}
	(0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

/// Format a float the way the engine prints it: shortest round-trip
/// representation.
fn format_float(v: f64, narrow: bool) -> String {
	if narrow {
		format!("{}", v as f32)
	} else {
		format!("{v}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mem::Discipline;

	fn ctx(arena: &Arena) -> CastContext<'_> {
		CastContext::new(arena)
	}

	#[test]
	fn empty_and_error_pass_through() {
		let arena = Arena::new(Discipline::Monotonic);
		let c = ctx(&arena);
		assert_eq!(cast(&Value::Empty, &CastTarget::Int4, &c), Value::Empty);
		let err = Value::Error(EvalErrorKind::Arithmetic);
		assert_eq!(cast(&err, &CastTarget::Int4, &c), err);
	}

	#[test]
	fn narrowing_int_cast_respects_the_policy() {
		let arena = Arena::new(Discipline::Monotonic);
		let mut c = ctx(&arena);
		let wide = Value::Int8(i64::from(i32::MAX) + 1);
		assert_eq!(cast(&wide, &CastTarget::Int4, &c), Value::Error(EvalErrorKind::LossOfPrecision));
		c.loss_policy = LossPolicy::Ignore;
		assert!(matches!(cast(&wide, &CastTarget::Int4, &c), Value::Int4(_)));
	}

	#[test]
	fn text_to_temporal_parses_canonical_literals() {
		let arena = Arena::new(Discipline::Monotonic);
		let c = ctx(&arena);
		let t = Value::Text(Text::inline("2024-06-15"));
		assert!(matches!(cast(&t, &CastTarget::Date, &c), Value::Date(_)));
		let bad = Value::Text(Text::inline("junk"));
		assert_eq!(cast(&bad, &CastTarget::Date, &c), Value::Error(EvalErrorKind::Format));
	}

	#[test]
	fn octet_refuses_numeric_targets() {
		let arena = Arena::new(Discipline::Monotonic);
		let c = ctx(&arena);
		let o = Value::Octet(Octet::inline(&[1, 2, 3]));
		assert_eq!(cast(&o, &CastTarget::Int4, &c), Value::Error(EvalErrorKind::UnsupportedCast));
	}

	#[test]
	fn fixed_character_pads_with_spaces() {
		let arena = Arena::new(Discipline::Monotonic);
		let c = ctx(&arena);
		let t = Value::Text(Text::inline("ab"));
		let target = CastTarget::Character {
			varying: false,
			length: Some(5),
		};
		match cast(&t, &target, &c) {
			Value::Text(out) => assert_eq!(out.as_str(), "ab   "),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn fixed_octet_pads_with_nuls() {
		let arena = Arena::new(Discipline::Monotonic);
		let c = ctx(&arena);
		let o = Value::Octet(Octet::inline(&[0xab]));
		let target = CastTarget::Octet {
			varying: false,
			length: Some(3),
		};
		match cast(&o, &target, &c) {
			Value::Octet(out) => assert_eq!(out.as_bytes(), &[0xab, 0, 0]),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn truncation_is_an_error_unless_lenient() {
		let arena = Arena::new(Discipline::Monotonic);
		let mut c = ctx(&arena);
		let t = Value::Text(Text::inline("abcdef"));
		let target = CastTarget::Character {
			varying: true,
			length: Some(3),
		};
		assert_eq!(cast(&t, &target, &c), Value::Error(EvalErrorKind::Truncation));
		c.lenient = true;
		match cast(&t, &target, &c) {
			Value::Text(out) => assert_eq!(out.as_str(), "abc"),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn zoneless_time_point_picks_up_the_global_offset() {
		let arena = Arena::new(Discipline::Monotonic);
		let mut c = ctx(&arena);
		c.zone_offset_minutes = 540;
		let t = Value::Text(Text::new("2024-01-01 09:00:00", &arena));
		let target = CastTarget::TimePoint {
			with_offset: true,
		};
		match cast(&t, &target, &c) {
			Value::TimePoint(tp) => {
				assert_eq!(tp.offset_minutes(), Some(540));
				// 09:00 at +09:00 is midnight UTC
				assert_eq!(tp.seconds() % (24 * 60 * 60), 0);
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn decimal_scale_loss_respects_the_policy() {
		let arena = Arena::new(Discipline::Monotonic);
		let c = ctx(&arena);
		// 10/3 assigned to DECIMAL(5,3) loses digits below the scale
		let v = Value::Decimal(Decimal::from_str_exact("3.3333333333").unwrap());
		let target = CastTarget::Decimal {
			precision: Some(5),
			scale: Some(3),
		};
		assert_eq!(cast(&v, &target, &c), Value::Error(EvalErrorKind::LossOfPrecision));
	}
}
