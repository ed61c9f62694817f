//! Invariant checks that must not take down a release-mode reactor.

/// Panics in debug builds, logs an error in release builds.
#[macro_export]
macro_rules! safe_panic {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        } else {
            tracing::error!($($arg)*);
        }
    };
}

/// `debug_assert!` that degrades to a `tracing::error!` in release builds.
#[macro_export]
macro_rules! safe_assert {
    ($cond:expr $(, $($arg:tt)+)?) => {
        if !$cond {
            $crate::safe_panic!(
                "assertion failed: {}{}",
                stringify!($cond),
                $crate::__safe_assert_msg!($($($arg)+)?)
            );
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __safe_assert_msg {
    () => {
        String::new()
    };
    ($($arg:tt)+) => {
        format!(": {}", format_args!($($arg)+))
    };
}
