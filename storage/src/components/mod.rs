mod memtable;
mod sstable;
mod table_cache;

pub use memtable::*;
pub use sstable::*;
pub use table_cache::*;
