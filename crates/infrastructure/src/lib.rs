pub mod database;
pub mod memory;
pub mod notification;
pub mod probe;
pub mod repository_factory;
pub mod transport;

pub use database::DatabaseManager;
pub use notification::{NotificationHub, Subscription};
pub use probe::TcpHealthProbe;
pub use repository_factory::{Repositories, RepositoryFactory};
pub use transport::{HttpRelayTransport, SimulatedTransport};
