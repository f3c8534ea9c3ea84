//! External collaborators behind narrow traits: retrieval, speech, stock footage,
//! web search and video assembly. Each has one production adapter; tests use the
//! scripted doubles in `mock`.

pub mod assembler;
pub mod footage;
pub mod retriever;
pub mod search;
pub mod speech;

pub use assembler::{FfmpegAssembler, VideoAssembler};
pub use footage::{FootageSource, PexelsFootage};
pub use retriever::{Document, HttpRetriever, MemoryRetriever, Retriever, EXAM_COLLECTION};
pub use search::{DuckDuckGoSearch, WebSearch};
pub use speech::{SarvamSpeech, SpeechSynthesizer};
