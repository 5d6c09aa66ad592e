//! # SeqSync Client
//!
//! Ordered delivery and resynchronization for a thin UI client.
//!
//! This crate provides:
//! - `Sequencer`: classifies updates as in-order, duplicate, or gap
//! - `ResyncBuffer`: holds updates received while desynchronized
//! - `HandshakeCoordinator`: resume requests and reply correlation
//! - `DispatchQueue`: single-consumer handler queue with cooperative yielding
//! - `SessionMonitor`: CONNECTED / DESYNCED / FATAL lifecycle
//! - `SessionCore`: the sans-IO composition of the above
//! - `Client`: a tokio runtime that drives a `SessionCore` over a `Transport`
//!
//! ## Architecture
//!
//! Transport callbacks may fire concurrently. They only send
//! [`SessionEvent`]s into a channel. A single session task owns the
//! `SessionCore`, so ordering decisions are made one event at a time, and
//! every handler call goes through the `DispatchQueue` in the order those
//! decisions were made.
//!
//! ## Key Invariants
//!
//! - Handlers for sequence `n + 1` never run before those for `n`
//! - A sequence number is dispatched at most once
//! - Buffered updates are re-classified before dispatch, never dispatched directly
//! - Once FATAL, nothing but the reload trigger runs

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chaos;
mod client;
mod config;
mod dispatch;
mod entropy;
mod error;
mod handshake;
mod monitor;
mod render;
mod resync_buffer;
mod sequencer;
mod session;
mod tab;
mod transport;

pub use chaos::ChaosPlan;
pub use client::{Client, ClientHandle, EventSender};
pub use config::{ChaosConfig, ClientConfig, DispatchConfig, DuplicatePolicy, GapPolicy};
pub use dispatch::{DispatchQueue, DispatchStats, TaskYielder, Thunk, Yielder};
pub use entropy::{OsRandom, RandomSource, SeededRandom};
pub use error::{ClientError, ClientResult, HandlerError};
pub use handshake::{AckOutcome, HandshakeCoordinator, ReplyOutcome};
pub use monitor::{FatalMarker, FatalReason, SessionMonitor, SessionState};
pub use render::{
    render_envelope, DispatchContext, Host, MemoryHost, MemoryRenderer, Origin, RenderedUpdate,
    Renderer,
};
pub use resync_buffer::ResyncBuffer;
pub use sequencer::{Classification, Sequencer};
pub use session::{Effect, SessionCore, SessionEvent, SessionStats};
pub use tab::{resolve_tab_id, MemoryTabStore, TabStore};
pub use transport::{MockTransport, Transport};
