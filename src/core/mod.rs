mod errors;
mod events;
mod manager;
mod progress;
mod queue;
mod scheduler;
mod store;
mod task;
mod traits;
mod types;
mod validator;
mod worker;

pub use errors::{Result, TransferError, UploadError};
pub use events::{EventHub, FilteredSubscription, Subscription};
pub use manager::{UploadManager, UploadManagerHandle};
pub use progress::{
    calculate_eta,
    calculate_percentage,
    calculate_speed,
    ProgressSink,
    ProgressSnapshot,
    ProgressTick,
};
pub use queue::AdmissionQueue;
pub use scheduler::CANCELLED_MESSAGE;
pub use store::TaskStore;
pub use task::UploadTask;
pub use traits::{SettingsStore, TransferEngine};
pub use types::{
    FileDescriptor,
    FileSource,
    PolicyPatch,
    SubmitOutcome,
    TransferJob,
    UploadEvent,
    UploadId,
    UploadPolicy,
    UploadState,
    UploadStats,
};
pub use validator::{validate, Rejection, Violation};
