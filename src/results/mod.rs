//! Result publication and collection through a shared directory
//!
//! Workers publish a [`ResultRecord`] per execution with
//! [`ResultPublisher`]; the executor collects them with [`ResultPoller`].

mod naming;
mod poller;
mod publisher;
mod record;

pub use naming::{sanitize_suite_id, FileKind, ResultFileName, FILE_PREFIX, TEMP_PREFIX};
pub use poller::{CollectedResult, PollReport, ResultPoller, SkippedFile};
pub use publisher::{CleanupGuard, Published, ResultPublisher};
pub use record::{RecordError, ResultRecord, TestCounts, TestDetail, TestStatus};
