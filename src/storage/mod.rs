pub mod history;
pub mod message_store;

pub use history::HistoryDatabase;
pub use message_store::MessageStore;

use std::fs;
use std::path::Path;

/// Ensure the directory holding the history database exists
pub fn ensure_data_dir(path: impl AsRef<Path>) -> std::io::Result<()> {
    fs::create_dir_all(path)
}
