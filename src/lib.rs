#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub(crate) mod command;
pub mod config;
pub mod error;
pub(crate) mod keepalive;
pub mod message;
pub(crate) mod pump;
pub mod reachability;
pub mod state;
pub mod transport;

pub use client::Client;
pub use message::Message;
pub use state::ConnectionState;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
