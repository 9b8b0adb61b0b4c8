//! Persistence adapters for the control plane.
//!
//! `FleetStore` is the CRUD surface the derived-state engines consume.
//! `PostgresStore` backs PROD deployments; `MemoryStore` backs DEV mode and
//! the test suites. `MetricsProvider` is the small time-series query
//! surface used by the dashboard scanner.

pub mod memory;
pub mod metrics;
pub mod postgres;
pub mod store;

pub use self::memory::MemoryStore;
pub use self::metrics::{MemoryMetrics, MetricsProvider, NoopMetrics, PostgresMetrics};
pub use self::postgres::PostgresStore;
pub use self::store::FleetStore;
