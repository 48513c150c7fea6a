//! Text preparation for speech
//!
//! Markdown-ish page text is normalized into plain speakable prose, then
//! split into bounded chunks that each become one synthesis request.

mod chunker;
mod normalize;

pub use chunker::{BREAK_SEARCH_LEN, Chunker, ChunkerConfig, MAX_CHUNK_LEN, TextChunk, split};
pub use normalize::normalize;
