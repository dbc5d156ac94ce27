//! Drip campaigns: definitions, the sent-record lifecycle, run orchestration
//! (select, render, enqueue), and the dispatch pass that delivers queued mail.

pub mod dispatch;
pub mod drip;
pub mod runner;
pub mod sent;
pub mod snapshot;
pub mod store;

pub use dispatch::{DispatchReport, Dispatcher};
pub use drip::{Drip, RenderEnv, RenderedEmail};
pub use runner::{DripRunner, RunReport};
pub use sent::{SendState, SentRecord};
pub use snapshot::Snapshot;
pub use store::{DripStore, Enqueued};
