pub mod audit;
pub mod cache;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod tx;
pub mod utils;
