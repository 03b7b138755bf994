pub mod auth;
pub mod client;
pub mod types;

pub use auth::BybitAuth;
pub use client::{BybitClient, Exchange, ExchangeError};
pub use types::{ApiOrder, Kline, OrderStatus, StopOrderKind, Ticker};
