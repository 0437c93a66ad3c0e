pub mod cached_adapters;
pub mod json_salvage;
pub mod markdown;
pub mod merger;
pub mod orchestrator;
pub mod role_classifier;
pub mod scoring;
pub mod text_analysis;
pub mod voice_track;
