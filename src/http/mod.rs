//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, trace + timeout layers)
//!     → middleware/correlation.rs (derive CorrelationContext, request span)
//!     → handlers.rs (/health, /metrics, /breakers)
//!     → middleware/metrics.rs (count, duration, in-flight by route)
//!     → correlation headers echoed on the response
//! ```

pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{AppState, HttpServer};
