pub mod app;
pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod gdc;
pub mod merge;
pub mod outdir;
pub mod output;
pub mod planner;
pub mod sample_sheet;
pub mod transport;
pub mod validate;
