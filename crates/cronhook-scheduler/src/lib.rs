//! `cronhook-scheduler`: time-ordered webhook scheduling engine with SQLite persistence.
//!
//! # Overview
//!
//! Active jobs live in an in-memory [`index::TimeIndex`] ordered by
//! `(due_at, job_id)`. A single [`engine::SchedulerLoop`] sleeps until the
//! earliest entry is due (or an index mutation wakes it), then drains every due
//! entry through the [`orchestrator::TickOrchestrator`], which spawns the
//! webhook dispatch and answers the job's next fire time.
//!
//! | Piece             | Module         | Role                                        |
//! |-------------------|----------------|---------------------------------------------|
//! | Time Index        | `index`        | ordered due times, O(log n) remove          |
//! | Scheduler Loop    | `engine`       | sleep / wake / drain                        |
//! | Dispatcher        | `dispatch`     | one webhook POST under a deadline           |
//! | Tick Orchestrator | `orchestrator` | retire, auto-pause, dispatch, reschedule    |
//! | History Ledger    | `history`      | bounded per-job outcome log                 |
//!
//! [`service::SchedulerService`] wires these together for the API layer.

pub mod clock;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod history;
pub mod index;
pub mod listener;
pub mod orchestrator;
pub mod schedule;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchOutcome, Dispatcher, ReqwestTransport, WebhookTransport};
pub use engine::{SchedulerLoop, TickHandler};
pub use error::{Result, SchedulerError};
pub use history::HistoryLedger;
pub use index::TimeIndex;
pub use listener::{JobEvent, JobListener, Listeners, PauseReason};
pub use service::SchedulerService;
pub use store::{HistoryStore, JobStore, SqliteHistoryStore, SqliteJobStore};
