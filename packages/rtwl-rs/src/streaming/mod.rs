// Real-time pipeline
//
// Tokio tasks connected by bounded channels:
//   ingest -> station workers -> region workers -> max worker -> events
// plus a control task that reloads travel times and starts shutdown.

mod coordinator;
mod replay;
mod types;
mod workers;

pub use coordinator::{PipelineCoordinator, PipelineHandle};
pub use replay::{read_chunks_jsonl, replay_rounds, write_chunks_jsonl, ReplayPacing};
pub use types::{ControlSignal, PipelineEvent, PipelineStats, WorkerState};
