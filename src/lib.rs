#![warn(rust_2018_idioms)]
#![warn(clippy::dbg_macro, clippy::print_stdout)]
#![doc = include_str!("../README.md")]

pub mod assembler;
pub mod cgi;
pub mod config;
pub mod conn;
mod error;
pub mod handler;
pub mod logging;
pub mod nvpair;
pub mod query;
pub mod record;
pub mod response;
pub mod server;
pub mod shutdown;

pub use crate::{
    assembler::PendingRequest,
    cgi::Request,
    cgi::decode::decode_request,
    config::{ListenAddr, ServerConfig},
    error::{FcgiError, FcgiResult},
    handler::RequestHandler,
    response::Response,
    server::Server,
    shutdown::Shutdown,
};
