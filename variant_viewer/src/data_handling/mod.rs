pub mod annotation_cache;
pub mod annotation_reader;
pub mod transcripts;
