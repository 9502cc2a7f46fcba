pub mod api;
pub mod engine;
pub mod store;
pub mod task;
pub mod validator;

pub use api::{DownloadApi, DownloadInfo, HttpDownloadApi};
pub use engine::{DownloadEngine, wait_until_settled};
pub use store::VideoStore;
pub use task::{DownloadProgress, DownloadStatus, DownloadTask};
pub use validator::{ContainerFormat, ValidationReport, validate_file};
