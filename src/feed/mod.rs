pub mod binance;

pub use binance::PriceFeed;
