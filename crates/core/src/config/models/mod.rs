pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod health_maintenance;
pub mod runner_delivery;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, AuthConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::{DatabaseBackend, DatabaseConfig};
pub use health_maintenance::{HealthConfig, MaintenanceConfig, NotificationConfig};
pub use runner_delivery::{DeliveryConfig, RunnerConfig, TransportKind};
