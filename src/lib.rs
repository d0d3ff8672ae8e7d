pub mod config;
pub mod error;
pub mod evaluation;
pub mod geometry;
pub mod layer;
pub mod output;
