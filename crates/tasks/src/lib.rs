pub mod builder;
pub mod intent;

pub use builder::{build, slug};
pub use intent::{keys, IntentKind, TaskContext, TaskIntent};
