pub mod keys;
pub mod store;

pub use keys::{diarization_key, llm_key, role_analysis_key, separation_key, sha256_prefix16};
pub use store::{stem_names_from_cached_payload, FileCacheStore, NullCacheStore};
