//! FLAC container metadata: the block chain and the three block types we interpret.

pub mod block;
mod cursor;
pub mod picture;
pub mod store;
pub mod streaminfo;
pub mod vorbis_comment;

pub use block::{BlockChain, BlockHeader, FLAC_MARKER, MetadataBlock};
pub use store::{DEFAULT_VENDOR, FlacMetadataStore};
pub use streaminfo::StreamInfo;
pub use vorbis_comment::VorbisComment;
