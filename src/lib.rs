pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod mirror;
pub mod output;
pub mod params;
pub mod repository;
pub mod resources;
pub mod selector;
pub mod store;
pub mod summary;
pub mod taxonomy;
