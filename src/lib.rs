//! # Colorlink - HTTP to Serial RGB Bridge
//!
//! Colorlink accepts color values from network clients and forwards them to a
//! microcontroller over a serial link as `r,g,b\n` lines, optionally echoing
//! what the device prints back.
//!
//! ## Features
//!
//! - **Forgiving Input**: `{"red":..}`, `{"r":..}`, `{"color":"r,g,b"}` or plain `r,g,b`, clamped into range.
//! - **Resilient Link**: Connects lazily, settles after open, reconnects once on a failed write.
//! - **Serialized Access**: One worker task owns the port; concurrent requests never interleave on the wire.
//! - **Async Design**: Built with Tokio; the HTTP adapter runs on warp.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colorlink::color::ColorCommand;
//! use colorlink::config::Config;
//! use colorlink::device::{SerialConnector, Session};
//! use colorlink::dispatch::{start_dispatcher, Dispatcher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let session = Session::new(config.session_config(), SerialConnector);
//!     let handle = start_dispatcher(Dispatcher::new(session));
//!
//!     let result = handle.send(ColorCommand::new(255, 128, 64)).await;
//!     println!("{:?}", result.outcome);
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`color`] - Input normalization into [`color::ColorCommand`]
//! - [`device`] - Serial session: connect, write, drain responses, close
//! - [`dispatch`] - Single-writer dispatch with bounded reconnect
//! - [`web`] - HTTP request adapter
//! - [`config`] - Configuration loading and defaults
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  HTTP Adapter   │ ← parses requests, renders results
//! └─────────────────┘
//!          │ ColorCommand
//! ┌─────────────────┐
//! │   Dispatcher    │ ← one send in flight, one reconnect cycle
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Serial Session  │ ← owns the port handle
//! └─────────────────┘
//! ```

pub mod color;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod logutil;
pub mod web;
