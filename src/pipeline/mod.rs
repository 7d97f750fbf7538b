//! Stage machinery: discovery, the completion gate, dispatch, and the
//! matching and assembly stages built on top of them.

pub mod assembler;
pub mod completion;
pub mod discovery;
pub mod dispatcher;
pub mod orchestrator;
pub mod reports;
pub mod table_io;
pub mod targets;
pub mod work_items;

pub use dispatcher::{BatchReport, DispatchMode, Dispatcher, ItemFailure, ItemOutcome, Stage, WorkUnit};
pub use orchestrator::{Collaborators, MlDataPipeline, PipelineReport};
