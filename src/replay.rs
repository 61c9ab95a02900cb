//! Replay-side building blocks of an analysis: reacting to trace events with
//! callbacks and sequencing the analysis in (compound) tasks.

pub(crate) mod callback_manager;
pub use callback_manager::{callback, Callback, CallbackManager, CallbackPtr, EventSelector};

pub(crate) mod task;
pub use task::{CompoundTask, FnTask, Task, TaskHandle, TaskId, TaskPhases};
