//! Inventory domain module.
//!
//! This crate contains the stock-change vocabulary shared by the broadcaster and the
//! product aggregator (updates, summaries, stock arithmetic), implemented purely as
//! deterministic domain logic (no IO, no async, no storage).

pub mod stock;

pub use stock::{
    SaleLine, StockSource, StockSummary, StockUpdate, StockUpdateRequest, apply_delta,
    take_stock,
};
