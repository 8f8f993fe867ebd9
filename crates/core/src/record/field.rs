use serde::{Deserialize, Serialize};

/// The option block a field type may carry: declared length, precision
/// and scale, or zone awareness, depending on the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FieldOption {
	/// Declared length for character and octet types
	pub length: Option<u32>,
	/// Declared precision for decimal types
	pub precision: Option<u8>,
	/// Declared scale for decimal types
	pub scale: Option<u8>,
}

/// The type of a single record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
	Boolean,
	Int1,
	Int2,
	Int4,
	Int8,
	Float4,
	Float8,
	Decimal(FieldOption),
	/// Character data; `varying` distinguishes VARCHAR from CHAR
	Character {
		varying: bool,
		option: FieldOption,
	},
	/// Binary data; `varying` distinguishes VARBINARY from BINARY
	Octet {
		varying: bool,
		option: FieldOption,
	},
	Date,
	TimeOfDay {
		with_offset: bool,
	},
	TimePoint {
		with_offset: bool,
	},
	Blob,
	Clob,
	/// The type of the untyped NULL literal; occupies no storage
	Unknown,
	/// An internal raw pointer field
	Pointer,
	/// An internal reference to a field by name
	RefByName,
	/// An internal reference to a field by position
	RefByPosition,
}

impl FieldType {
	/// The width in bytes of the field image inside a packed record.
	pub fn size(&self) -> usize {
		match self {
			Self::Boolean | Self::Int1 => 1,
			Self::Int2 => 2,
			Self::Int4 | Self::Float4 => 4,
			Self::Int8 | Self::Float8 | Self::Date => 8,
			// Triple image: coefficient halves, exponent, sign
			Self::Decimal(_) => 24,
			// SSO image: inline payload or pointer and length
			Self::Character {
				..
			}
			| Self::Octet {
				..
			} => 16,
			Self::TimeOfDay {
				with_offset: false,
			} => 8,
			Self::TimeOfDay {
				with_offset: true,
			} => 16,
			Self::TimePoint {
				..
			} => 16,
			Self::Blob | Self::Clob => 40,
			Self::Unknown => 0,
			Self::Pointer | Self::RefByName | Self::RefByPosition => 8,
		}
	}

	/// The alignment of the field image inside a packed record.
	pub fn alignment(&self) -> usize {
		match self {
			Self::Boolean | Self::Int1 | Self::Unknown => 1,
			Self::Int2 => 2,
			Self::Int4 | Self::Float4 => 4,
			_ => 8,
		}
	}

	/// Whether the field stores a variable-length payload that may
	/// point into an arena.
	pub fn is_varlen(&self) -> bool {
		matches!(
			self,
			Self::Character {
				..
			} | Self::Octet {
				..
			}
		)
	}

	/// The declared option block, where the type carries one.
	pub fn option(&self) -> Option<&FieldOption> {
		match self {
			Self::Decimal(option) => Some(option),
			Self::Character {
				option,
				..
			} => Some(option),
			Self::Octet {
				option,
				..
			} => Some(option),
			_ => None,
		}
	}
}

impl std::fmt::Display for FieldType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Boolean => write!(f, "BOOLEAN"),
			Self::Int1 => write!(f, "TINYINT"),
			Self::Int2 => write!(f, "SMALLINT"),
			Self::Int4 => write!(f, "INT"),
			Self::Int8 => write!(f, "BIGINT"),
			Self::Float4 => write!(f, "REAL"),
			Self::Float8 => write!(f, "DOUBLE"),
			Self::Decimal(option) => match (option.precision, option.scale) {
				(Some(p), Some(s)) => write!(f, "DECIMAL({p},{s})"),
				(Some(p), None) => write!(f, "DECIMAL({p})"),
				_ => write!(f, "DECIMAL"),
			},
			Self::Character {
				varying,
				option,
			} => {
				let name = if *varying {
					"VARCHAR"
				} else {
					"CHAR"
				};
				match option.length {
					Some(n) => write!(f, "{name}({n})"),
					None => write!(f, "{name}"),
				}
			}
			Self::Octet {
				varying,
				option,
			} => {
				let name = if *varying {
					"VARBINARY"
				} else {
					"BINARY"
				};
				match option.length {
					Some(n) => write!(f, "{name}({n})"),
					None => write!(f, "{name}"),
				}
			}
			Self::Date => write!(f, "DATE"),
			Self::TimeOfDay {
				with_offset,
			} => {
				write!(f, "TIME")?;
				if *with_offset {
					write!(f, " WITH TIME ZONE")?;
				}
				Ok(())
			}
			Self::TimePoint {
				with_offset,
			} => {
				write!(f, "TIMESTAMP")?;
				if *with_offset {
					write!(f, " WITH TIME ZONE")?;
				}
				Ok(())
			}
			Self::Blob => write!(f, "BLOB"),
			Self::Clob => write!(f, "CLOB"),
			Self::Unknown => write!(f, "UNKNOWN"),
			Self::Pointer => write!(f, "<pointer>"),
			Self::RefByName => write!(f, "<ref by name>"),
			Self::RefByPosition => write!(f, "<ref by position>"),
		}
	}
}

/// Shorthand constructors used throughout plans and tests.
impl FieldType {
	/// A VARCHAR with an optional declared length.
	pub fn varchar(length: Option<u32>) -> Self {
		Self::Character {
			varying: true,
			option: FieldOption {
				length,
				..Default::default()
			},
		}
	}

	/// A CHAR with a declared length.
	pub fn char(length: u32) -> Self {
		Self::Character {
			varying: false,
			option: FieldOption {
				length: Some(length),
				..Default::default()
			},
		}
	}

	/// A DECIMAL with a declared precision and scale.
	pub fn decimal(precision: u8, scale: u8) -> Self {
		Self::Decimal(FieldOption {
			precision: Some(precision),
			scale: Some(scale),
			..Default::default()
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sizes_are_multiples_of_alignment() {
		let all = [
			FieldType::Boolean,
			FieldType::Int1,
			FieldType::Int2,
			FieldType::Int4,
			FieldType::Int8,
			FieldType::Float4,
			FieldType::Float8,
			FieldType::decimal(10, 2),
			FieldType::varchar(None),
			FieldType::char(4),
			FieldType::Date,
			FieldType::TimeOfDay {
				with_offset: true,
			},
			FieldType::TimePoint {
				with_offset: false,
			},
			FieldType::Blob,
			FieldType::Clob,
			FieldType::Pointer,
		];
		for ty in all {
			assert_eq!(ty.size() % ty.alignment(), 0, "{ty}");
			assert!(ty.alignment().is_power_of_two());
		}
	}

	#[test]
	fn unknown_occupies_no_space() {
		assert_eq!(FieldType::Unknown.size(), 0);
	}
}
