pub mod executor;
pub mod registry;
pub mod schema;
pub mod task_commands;
pub mod value;

pub use executor::{CommandDispatcher, CommandOutput};
pub use registry::{CallContext, Command, CommandArgs, CommandRegistry, CommandSpec, ParamSpec};
pub use schema::parameters_schema;
pub use task_commands::register_task_commands;
pub use value::{ArgMap, ArgValue, CallOrigin, ParamKind, ToolCall};
