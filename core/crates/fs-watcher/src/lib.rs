//! Recursive filesystem observation, glob filtering, and stat/MD5
//! enrichment, dispatched onward to a [`ps_state_manager::StateSink`].

mod event;
mod filter;
mod watcher;

pub use event::{encode_stat, RawEvent, StatBlob};
pub use filter::{default_excludes, default_includes, FilterSet};
pub use watcher::{EventHandler, WatcherHandle};
