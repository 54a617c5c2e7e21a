#![allow(dead_code)]

#[macro_use]
extern crate log;

mod codec;
mod config;
mod dispatch;
mod driver;
mod error;
mod file;
mod gaps;
mod liveness;
mod log_util;
mod matrix;
mod source;
mod store;
mod timestamp;
mod types;
mod worker;


pub use codec::*;
pub use config::*;
pub use dispatch::*;
pub use driver::*;
pub use error::*;
pub use file::*;
pub use gaps::*;
pub use liveness::*;
pub use log_util::*;
pub use matrix::*;
pub use source::*;
pub use store::*;
pub use timestamp::*;
pub use types::*;
pub use worker::*;
