//! 内置任务执行器

pub mod phone;
pub mod sms;

pub use phone::{PhoneGenerationExecutor, PhoneValidationExecutor};
pub use sms::SmsCampaignExecutor;
