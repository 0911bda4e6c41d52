pub mod autosave;
pub mod branch_edit;
pub mod config;
mod error;
pub mod integrity;
pub mod layout;
pub mod mutation;
pub mod reconcile;
pub mod session;

#[cfg(test)]
mod test_support;

pub use autosave::{AutoSaver, EditorEvent};
pub use config::{EditorConfig, LayoutConfig};
pub use error::MutationError;
pub use session::EditorSession;
