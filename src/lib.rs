#![allow(clippy::too_many_arguments)]

extern crate bitflags;
extern crate tera;
#[macro_use]
extern crate tracing;

pub mod backend;
pub mod cli;
pub mod codegen;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod filter;
pub mod graph;
pub mod hooks;
pub mod logger;
pub mod output_cache;
pub mod process;
pub mod report;
pub mod runner;
pub mod scheduler;
