//! Task tracking data model, the authoritative `TaskManager`, and
//! inter-tier message/timeline types.

pub mod manager;
pub mod types;

pub use manager::{TaskError, TaskManager};
pub use types::{
    CreateTaskInput, Direction, MessageKind, MsgId, Task, TaskId, TaskStatus, Tier,
    TimelineEntry, WatchdogState,
};
