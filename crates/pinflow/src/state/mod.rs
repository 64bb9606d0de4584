pub mod schema;
pub mod store;

pub use schema::{
    JobError, JobRecord, JobStatus, MediaKind, ModelChoice, PendingAction, StateDoc, UserState,
    WizardStep,
};
pub use store::{StateError, StateStore};
