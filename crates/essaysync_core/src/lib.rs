pub mod blocks;
pub mod config;
pub mod error;
pub mod essay;
pub mod feed;
pub mod gateway;
pub mod notion;
pub mod reconcile;
pub mod runtime;
