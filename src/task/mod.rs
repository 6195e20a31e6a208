//! 任务图：模型、依赖校验、存储、持久化、展示与到期提醒

pub mod due_time;
pub mod format;
pub mod graph;
pub mod model;
pub mod persistence;
pub mod reminder;
pub mod store;

pub use due_time::parse_due_time;
pub use model::{FieldUpdate, NewTask, Task, TaskId, TaskStatus};
pub use persistence::{MemoryPersistence, SqlitePersistence, TaskPersistence};
pub use reminder::{spawn_reminder, ReminderKind, ReminderNotice, ReminderSettings};
pub use store::TaskStore;
