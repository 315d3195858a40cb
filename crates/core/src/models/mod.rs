pub mod delivery;
pub mod event;
pub mod job;
pub mod resource;
pub mod settings;
pub mod usage;

pub use delivery::{DeliveryReceipt, DeliveryRoute, DeliveryUnit, FailureBlame, SendFailure};
pub use event::{JobEvent, JobEventEnvelope};
pub use job::{
    categories, JobDefinition, JobFilter, JobRecord, JobStatus, JobStatusView, Pagination,
    ProgressUpdate,
};
pub use resource::{ResourceHealthSnapshot, ResourceProtocol, ResourceRecord, ResourceRole};
pub use settings::{
    CampaignDeliverySettings, ConfigurationDocument, EffectiveDeliverySettings, ResourceExport,
    RotationSettings, RotationStrategy,
};
pub use usage::UsageLog;
