//! The five data collectors (C5-C9): one module per upstream surface,
//! each exposing an async `collect_once()` (or, for the trade
//! listener, a `run`/`stop` lifecycle) that never propagates an
//! error — a single malformed record or failed request is logged and
//! skipped so the supervising loop keeps going.

pub mod metadata;
pub mod orderbook;
pub mod prices;
pub mod resolution;
pub mod trades;
