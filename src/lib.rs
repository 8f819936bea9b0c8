pub mod api;
pub mod catalog;
pub mod cipher;
pub mod config;
pub mod error;
pub mod extractors;
pub mod fetcher;
pub mod hindi;
pub mod models;
pub mod proxy;
pub mod resolver;
pub mod utils;
