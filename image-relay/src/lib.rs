//! Image Relay - send web page images to a local processing service
//!
//! A user picks an image on a page; the relay ships that image and what the
//! page says about it to a service on the local machine, then follows the
//! resulting job until it finishes.
//!
//! - **Page context**: acquires the image (re-rasterize, fetch, or pass the
//!   locator through) and correlates it with its element on the page
//! - **Messenger**: probe / data-request protocol between coordinator and page,
//!   in-process or over native messaging to a `page-agent` child
//! - **Coordinator**: runs the pipeline per trigger and reports the outcome
//! - **Task poller**: bounded fixed-interval status polling
//!
//! # Architecture
//!
//! The coordinator never reads the page itself. It talks to page contexts
//! only through the [`messenger::Messenger`] and re-installs an extractor
//! once when a probe goes unanswered. Settings are read through an
//! immutable snapshot per operation.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod messenger;
pub mod notify;
pub mod page;
pub mod poller;
pub mod submission;
pub mod types;

// Re-export commonly used types
pub use config::{
    parse_port, FileSettingsStore, MemorySettingsStore, Settings, SettingsCache, SettingsStore,
    SettingsUpdate,
};
pub use coordinator::{Coordinator, CoordinatorTimings, TriggerOutcome};
pub use error::{
    AcquireError, ConfigError, DocumentError, MessengerError, NotifyError, RelayError, SubmitError,
};
pub use messenger::{
    ExtractorInstaller, InProcessHost, Messenger, PageRegistration, PageRequest, PageResponse,
    ProcessHost,
};
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use page::document::{DocumentQuery, DocumentSnapshot};
pub use page::PageAgent;
pub use poller::{PollSchedule, PollState, TaskPoller, TaskStatusSource};
pub use submission::{ConnectionTest, ServerStatus, ServiceClient};
pub use types::{
    AcquiredImage, AcquisitionStrategy, ContextId, PageInfo, SubmissionPageInfo,
    SubmissionRequest, TaskHandle, TaskStatus, TriggerEvent, TriggerKind,
};
