//! Logging shims.
//!
//! Forwards to `log`, `defmt` or `esp-println` depending on the enabled
//! feature, and compiles to nothing when none is enabled. Arguments must
//! be formattable by every backend, so only pass `&str`, integers and
//! types deriving both `Debug` and `defmt::Format`.
#![macro_use]
#![allow(unused_macros)]

macro_rules! __vpin_log {
    ($level:ident, $esp_tag:literal, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(feature = "esp32-log")]
            ::esp_println::println!(concat!("[", $esp_tag, "] ", $s) $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($($t:tt)*) => { __vpin_log!(trace, "TRACE", $($t)*) };
}

macro_rules! debug {
    ($($t:tt)*) => { __vpin_log!(debug, "DEBUG", $($t)*) };
}

macro_rules! info {
    ($($t:tt)*) => { __vpin_log!(info, "INFO", $($t)*) };
}

macro_rules! warn {
    ($($t:tt)*) => { __vpin_log!(warn, "WARN", $($t)*) };
}

macro_rules! error {
    ($($t:tt)*) => { __vpin_log!(error, "ERROR", $($t)*) };
}
