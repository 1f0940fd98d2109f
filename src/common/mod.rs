//! Shared filesystem helpers.

pub mod fsutil;
pub mod temp;

pub use fsutil::{TreeCopier, TreeRemover};
pub use temp::{remove_file_if_exists, TempDir, TempFile};
