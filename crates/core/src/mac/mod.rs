/// A macro that allows lazily parsing a value from the environment
/// variable, with a fallback default value if the variable is not set
/// or parsing fails.
macro_rules! lazy_env_parse {
	($key:expr, $t:ty, $default:expr) => {
		once_cell::sync::Lazy::new(|| {
			std::env::var($key)
				.ok()
				.and_then(|s| s.parse::<$t>().ok())
				.unwrap_or($default)
		})
	};
}

/// Throws an unreachable error with helpful debugging information.
macro_rules! fail {
	($($arg:tt)+) => {
		return Err($crate::err::Error::Unreachable(format!($($arg)+)))
	};
}

/// Builds an [`ErrorInfo`](crate::err::ErrorInfo) from an error,
/// capturing the source file and line of the call site.
macro_rules! error_info {
	($error:expr) => {
		$crate::err::ErrorInfo::new($error, file!(), line!())
	};
	($error:expr, $supplemental:expr) => {
		$crate::err::ErrorInfo::new($error, file!(), line!()).with_supplemental($supplemental)
	};
}
