pub mod batch;
pub mod check;
pub mod config;
pub mod infer;
