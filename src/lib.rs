pub mod binder;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod harness;
pub mod invoke;
pub mod logging;
pub mod picker;
pub mod reference;
pub mod reflect;
pub mod runner;
pub mod samples;
pub mod store;
pub mod value;

pub use binder::CallFrame;
pub use command::{discover, Command, CommandRegistry, CommandSpec, ParamDecl, PassMode};
pub use config::RunnerConfig;
pub use invoke::{run, RunOutcome, Severity};
pub use picker::{ComponentAccess, EntityPickerSpec};
pub use runner::CommandRunner;
pub use store::{Store, StoreRegistry};
pub use value::{TypeKey, ValueType};
