//! Content-addressable blob cache.
//!
//! Blobs are stored under `<root>/<hash[0:2]>/<hash[2:]>` and linked into
//! working trees with hardlinks or symlinks.

mod links;
mod store;

pub use links::{clean_links, is_cache_linked, LinkMode};
pub use store::ContentCache;
