#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod connector;
pub mod discovery;
pub mod grpc;
pub mod rpc;
pub mod storage;
pub mod utils;
pub mod web;
