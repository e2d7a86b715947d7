pub mod cli;
pub mod config;
pub mod core;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use crate::core::{
    FileDescriptor,
    FileSource,
    PolicyPatch,
    Result,
    SubmitOutcome,
    Subscription,
    TransferEngine,
    TransferError,
    UploadError,
    UploadEvent,
    UploadId,
    UploadManager,
    UploadManagerHandle,
    UploadPolicy,
    UploadState,
    UploadStats,
    UploadTask,
};

// 重新导出上传器
pub use crate::uploaders::{HttpEngine, SimulatedEngine};
