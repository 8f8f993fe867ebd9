use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::err::EvalErrorKind;

/// The record image of a decimal value: sign, 128-bit coefficient in
/// two halves, and a base-10 exponent. The runtime arithmetic type is
/// [`Decimal`]; triples are only materialised when a decimal crosses a
/// record boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triple {
	/// -1, 0 or +1
	pub sign: i8,
	/// The upper 64 bits of the coefficient
	pub coefficient_high: u64,
	/// The lower 64 bits of the coefficient
	pub coefficient_low: u64,
	/// The base-10 exponent; the value is `sign * coefficient *
	/// 10^exponent`
	pub exponent: i32,
}

impl Triple {
	/// The zero triple.
	pub const ZERO: Triple = Triple {
		sign: 0,
		coefficient_high: 0,
		coefficient_low: 0,
		exponent: 0,
	};

	/// Build a triple from a runtime decimal.
	pub fn from_decimal(value: &Decimal) -> Self {
		let mantissa = value.mantissa();
		let sign = match mantissa.cmp(&0) {
			std::cmp::Ordering::Less => -1,
			std::cmp::Ordering::Equal => 0,
			std::cmp::Ordering::Greater => 1,
		};
		let coefficient = mantissa.unsigned_abs();
		Self {
			sign,
			coefficient_high: (coefficient >> 64) as u64,
			coefficient_low: coefficient as u64,
			exponent: -(value.scale() as i32),
		}
	}

	/// Convert the triple back into a runtime decimal. Coefficients
	/// beyond 96 bits or exponents outside the supported scale range
	/// produce an arithmetic error.
	pub fn to_decimal(&self) -> Result<Decimal, EvalErrorKind> {
		let coefficient = ((self.coefficient_high as u128) << 64) | self.coefficient_low as u128;
		if coefficient > (1u128 << 96) - 1 {
			return Err(EvalErrorKind::Arithmetic);
		}
		if self.exponent > 0 {
			// Normalise positive exponents by scaling the coefficient
			let factor = 10u128.checked_pow(self.exponent as u32).ok_or(EvalErrorKind::Arithmetic)?;
			let scaled = coefficient.checked_mul(factor).ok_or(EvalErrorKind::Arithmetic)?;
			if scaled > (1u128 << 96) - 1 {
				return Err(EvalErrorKind::Arithmetic);
			}
			let mantissa = scaled as i128 * self.sign as i128;
			Decimal::try_from_i128_with_scale(mantissa, 0).map_err(|_| EvalErrorKind::Arithmetic)
		} else {
			let scale = (-self.exponent) as u32;
			if scale > 28 {
				return Err(EvalErrorKind::Arithmetic);
			}
			let mantissa = coefficient as i128 * self.sign as i128;
			Decimal::try_from_i128_with_scale(mantissa, scale).map_err(|_| EvalErrorKind::Arithmetic)
		}
	}
}

/// Round a decimal to a declared `(precision, scale)` pair under the
/// half-up rule. Values whose integral part does not fit the declared
/// precision produce an arithmetic error.
pub fn enforce_precision(
	value: Decimal,
	precision: Option<u8>,
	scale: Option<u8>,
) -> Result<Decimal, EvalErrorKind> {
	let mut out = value;
	if let Some(scale) = scale {
		out = out.round_dp_with_strategy(scale as u32, RoundingStrategy::MidpointAwayFromZero);
	}
	if let Some(precision) = precision {
		let digits = decimal_digits(&out);
		if digits > precision as u32 {
			return Err(EvalErrorKind::Arithmetic);
		}
	}
	Ok(out)
}

/// The number of significant base-10 digits in a decimal coefficient.
fn decimal_digits(value: &Decimal) -> u32 {
	let mut mantissa = value.mantissa().unsigned_abs();
	if mantissa == 0 {
		return 1;
	}
	let mut digits = 0;
	while mantissa > 0 {
		mantissa /= 10;
		digits += 1;
	}
	digits
}

/// Checked decimal addition; overflow traps instead of wrapping.
pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, EvalErrorKind> {
	a.checked_add(b).ok_or(EvalErrorKind::Arithmetic)
}

/// Checked decimal subtraction; overflow traps instead of wrapping.
pub fn checked_sub(a: Decimal, b: Decimal) -> Result<Decimal, EvalErrorKind> {
	a.checked_sub(b).ok_or(EvalErrorKind::Arithmetic)
}

/// Checked decimal multiplication; overflow traps instead of wrapping.
pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal, EvalErrorKind> {
	a.checked_mul(b).ok_or(EvalErrorKind::Arithmetic)
}

/// Checked decimal division; division by zero and overflow trap.
pub fn checked_div(a: Decimal, b: Decimal) -> Result<Decimal, EvalErrorKind> {
	if b.is_zero() {
		return Err(EvalErrorKind::Arithmetic);
	}
	a.checked_div(b).ok_or(EvalErrorKind::Arithmetic)
}

/// Checked decimal remainder; remainder by zero traps.
pub fn checked_rem(a: Decimal, b: Decimal) -> Result<Decimal, EvalErrorKind> {
	if b.is_zero() {
		return Err(EvalErrorKind::Arithmetic);
	}
	a.checked_rem(b).ok_or(EvalErrorKind::Arithmetic)
}

/// Convert a decimal to an i64, trapping when the value does not fit.
pub fn decimal_to_i64(value: &Decimal) -> Result<i64, EvalErrorKind> {
	value.trunc().to_i64().ok_or(EvalErrorKind::Arithmetic)
}
