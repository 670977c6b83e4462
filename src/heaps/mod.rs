//! Metadata heaps: #Strings, #US, #Blob.

mod blob;
mod strings;
mod us;

pub use blob::BlobHeap;
pub use strings::StringsHeap;
pub use us::{MAX_USER_STRING_OFFSET, UserStringsHeap};
