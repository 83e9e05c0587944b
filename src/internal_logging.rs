//! Crate-internal diagnostic macros.
//!
//! These forward to [`tracing`] when the `internal-logs` feature is enabled,
//! print to stdout under test so `--nocapture` shows the dispatch flow, and
//! compile to nothing otherwise. They are for registry bookkeeping events
//! only and are never used on the per-span hot path.

macro_rules! diag_debug {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name $(, $key = $value)*);
        }

        #[cfg(all(test, not(feature = "internal-logs")))]
        {
            print!("diag_debug: name={}", $name);
            $(print!(", {}={}", stringify!($key), $value);)*
            println!();
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name $(, $value)*);
        }
    };
}

macro_rules! diag_warn {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name $(, $key = $value)*);
        }

        #[cfg(all(test, not(feature = "internal-logs")))]
        {
            print!("diag_warn: name={}", $name);
            $(print!(", {}={}", stringify!($key), $value);)*
            println!();
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name $(, $value)*);
        }
    };
}

pub(crate) use {diag_debug, diag_warn};
