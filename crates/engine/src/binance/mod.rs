pub mod klines;

pub use klines::{interval_code, BinanceKlines};
