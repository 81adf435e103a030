// Content hashing module
// MD5 digests are the content-addressable cache key and the manifest's `md5` field

mod digest;

pub use digest::{hash_file, hash_reader, is_valid_hash, HashingWriter, HASH_LEN};
