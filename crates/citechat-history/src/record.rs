use std::sync::{Arc, Weak};

use citechat_core::{ChatHistory, LibraryContext};

/// A cached live history. The library is held weakly: it is consulted to
/// decide persistability at flush time and never kept alive by the cache.
pub(crate) struct HistoryRecord {
    pub(crate) history: ChatHistory,
    library: Weak<LibraryContext>,
}

impl HistoryRecord {
    pub(crate) fn new(history: ChatHistory, library: &Arc<LibraryContext>) -> Self {
        Self {
            history,
            library: Arc::downgrade(library),
        }
    }

    pub(crate) fn library(&self) -> Option<Arc<LibraryContext>> {
        self.library.upgrade()
    }
}
