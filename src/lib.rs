pub mod classify;
pub mod config;
pub mod domain;
pub mod error;
pub mod features;
pub mod flows;
pub mod google;
pub mod output;
pub mod serpapi;
pub mod storage;
pub mod text;
pub mod warehouse;
