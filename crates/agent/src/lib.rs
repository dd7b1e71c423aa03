//! GameQA test agent
//!
//! Drives a browser against a game URL, interacts with it, collects
//! screenshots and console output, scores playability and assembles a
//! report.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                         │
//! │    ├── submit / submit_batch / cancel / shutdown            │
//! │    ├── job + batch tables (RwLock), slot semaphore          │
//! │    └── one task per job, under the job deadline             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AutomationSession (process token → tab token)              │
//! │    ├── detector    canvas / dom / hybrid                    │
//! │    ├── dispatcher  Canvas | Element | Window targets        │
//! │    └── evidence    screenshots + console log                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Evaluator (retry, heuristic fallback) → ReportBuilder      │
//! │  JobStore / ArtifactStore collaborators                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod chrome;
pub mod detector;
pub mod dispatcher;
pub mod driver;
pub mod evaluator;
pub mod evidence;
pub mod orchestrator;
pub mod report;
pub mod schema;
pub mod scoring;
pub mod session;
pub mod store;
pub mod visual;

pub use chrome::ChromeDriver;
pub use detector::Classification;
pub use dispatcher::{DispatchTarget, EntryControl};
pub use driver::{BrowserDriver, BrowserProcess, PageHandle};
pub use evaluator::{Evaluator, ScoringError, ScoringService};
pub use evidence::EvidenceCollector;
pub use orchestrator::{BatchSubmission, Orchestrator, OrchestratorBuilder};
pub use report::ReportBuilder;
pub use schema::InteractionSchema;
pub use scoring::HttpScoringService;
pub use session::AutomationSession;
pub use store::{ArtifactStore, FileArtifactStore, FileJobStore, JobFilter, JobStore, MemoryJobStore};
