//! Rate-limited logging
//!
//! Hot paths (Lock, Blt, Present) can fail thousands of times per second when a
//! game spins on a busy surface. These macros cap the number of events each
//! call site may emit.

/// Emit a `tracing::warn!` at most `$limit` times from this call site
macro_rules! limit_warn {
    ($limit:expr, $($arg:tt)+) => {{
        static HITS: ::std::sync::atomic::AtomicU32 = ::std::sync::atomic::AtomicU32::new(0);
        if HITS.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed) < $limit {
            ::tracing::warn!($($arg)+);
        }
    }};
}

/// Emit a `tracing::debug!` at most `$limit` times from this call site
macro_rules! limit_debug {
    ($limit:expr, $($arg:tt)+) => {{
        static HITS: ::std::sync::atomic::AtomicU32 = ::std::sync::atomic::AtomicU32::new(0);
        if HITS.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed) < $limit {
            ::tracing::debug!($($arg)+);
        }
    }};
}

/// Warn about a legacy feature that is accepted but not emulated
macro_rules! not_implemented {
    ($what:expr) => {
        limit_warn!(100, "Not implemented: {}", $what)
    };
}
