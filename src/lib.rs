pub mod banner;
pub mod config;
pub mod consts;
pub mod engine;
pub mod error;
pub mod models;
pub mod params;
pub mod provider;
pub mod service;
pub mod settings;
pub mod store;
