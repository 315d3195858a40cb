pub mod events;
pub mod health;
pub mod jobs;
pub mod resources;
pub mod settings;
