//! fibscan Library
//!
//! Fibonacci/Elliott pattern scanner and staged momentum-pullback trader
//! for USDT perpetuals

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod features;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod staging;
pub mod strategy;
pub mod types;
