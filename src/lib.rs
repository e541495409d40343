//! marketwatch - 24/7 prediction-market data collector and analytics
//! layer.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/             # Store, collectors, supervisor, analytics
//! │   ├── domain/       # Pure data-model types
//! │   ├── collectors/   # Metadata/price/orderbook/resolution/trade collectors
//! │   ├── store/        # TimescaleDB-backed persistence + migrations
//! │   ├── analysis.rs   # Cross-market correlation, mispricing, signals
//! │   └── features.rs   # Per-token feature extraction
//! └── app/              # Configuration + orchestration
//! ```

pub mod app;
pub mod cli;
pub mod core;
pub mod error;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
