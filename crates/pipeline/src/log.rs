//! Logging front-end.
//!
//! Routes to `defmt` on target and `tracing` on the host emulator. With
//! neither feature enabled the macros type-check their arguments and compile
//! to nothing. Format strings must stick to plain `{}` placeholders and
//! arguments must implement both `defmt::Format` and `Display`.

#![allow(unused_macros)]

macro_rules! log_at {
    ($defmt:ident, $tracing:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::$defmt!($s $(, $x)*);
            #[cfg(all(feature = "tracing", not(feature = "defmt")))]
            ::tracing::$tracing!($s $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "tracing")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($($t:tt)*) => { log_at!(trace, trace, $($t)*) };
}

macro_rules! debug {
    ($($t:tt)*) => { log_at!(debug, debug, $($t)*) };
}

macro_rules! info {
    ($($t:tt)*) => { log_at!(info, info, $($t)*) };
}

macro_rules! warn {
    ($($t:tt)*) => { log_at!(warn, warn, $($t)*) };
}

macro_rules! error {
    ($($t:tt)*) => { log_at!(error, error, $($t)*) };
}
