//! Multi-client line server with an Ohm's law calculator and a unanimous
//! shutdown vote.
//!
//! Clients speak `\r\n`-terminated text lines over TCP. Each module owns one
//! concern:
//!
//! - [`cli`] and [`config`] turn flags and an optional JSON file into a
//!   [`config::ServerConfig`].
//! - [`server`] accepts connections and runs one handler task per client.
//! - [`framer`] splits the byte stream into lines, however it is chunked.
//! - [`session`] keeps per-connection mode and routes each line.
//! - [`command`] parses and executes the command keywords.
//! - [`calculator`] is the Ohm's law state machine.
//! - [`registry`] tracks live connections and the shutdown poll.
//! - [`client`] is a small terminal client for manual use.

pub mod calculator;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod framer;
pub mod registry;
pub mod server;
pub mod session;
