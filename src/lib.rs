pub mod bridge;
pub mod cli;
pub mod config;
pub mod convert;
pub mod events;
pub mod fs_safe;
pub mod journal;
pub mod logging;
pub mod matcher;
pub mod paths;
pub mod rename;
pub mod service;
pub mod template;
pub mod trash;
pub mod utils;
pub mod watcher;

pub use config::{Action, Config, ConfigPatch, ConfigStore, Profile};
pub use convert::{Conversion, ConvertOptions, Converter};
pub use events::{EventBus, FileEvent, FileEventKind, ServiceEvent, StatusPayload, Toast};
pub use journal::{JournalStore, UndoOutcome};
pub use matcher::ProfileMatcher;
pub use rename::RenameService;
pub use service::{NamefixService, NamefixServiceBuilder, ServiceError};
pub use template::DEFAULT_TEMPLATE;
pub use trash::{Trash, TrashOutcome};
pub use watcher::{DirWatcher, WatchEvent};
