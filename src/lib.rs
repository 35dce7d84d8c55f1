pub mod api;
pub mod cache;
pub mod config;
pub mod data_models;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod metasearch;
pub mod orchestrator;
pub mod scoring;
