pub mod delivery;
pub mod repository;

pub use delivery::*;
pub use repository::*;
