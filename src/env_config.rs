//! Environment-variable parsing for the manager's tuning knobs.
//!
//! Every feature toggle goes through these helpers so truthy/falsey
//! parsing lives in exactly one place.

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| parse_truthy(&raw))
        .unwrap_or(false)
}

#[inline]
fn parse_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_unless(fn_name, "ENV_VAR")` is on by default and turned off by
/// a truthy env var. `enabled_when(fn_name, "ENV_VAR")` is off by default.
macro_rules! define_env_flag {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
    (enabled_when($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;

#[cfg(test)]
mod tests {
    use super::parse_truthy;

    #[test]
    fn truthy_values_are_case_insensitive_and_trimmed() {
        for raw in ["1", "true", " TRUE ", "Yes", "on"] {
            assert!(parse_truthy(raw), "{raw:?} should be truthy");
        }
        for raw in ["", "0", "false", "off", "enabled"] {
            assert!(!parse_truthy(raw), "{raw:?} should be falsey");
        }
    }
}
