//! Top-level orchestration crate: wires Generation Handle → Session State →
//! Turn Detector → Cascade Scheduler → Interruption Arbiter → Event Router
//! into one actor task per session.
//!
//! Nothing in this crate implements pipeline logic itself — that all lives
//! in the lower crates it depends on (`gibberish-handle` through
//! `gibberish-router`). This crate's only job is the wiring: a shared
//! [`VtpRuntime`] holding the driver collaborators and the playback queue,
//! and a [`actor::SessionHandle`] per conversation tab driving the
//! `select!`-based actor loop described in §5.

mod actor;
mod queue;
mod runtime;

pub use actor::{spawn, ActorMessage, SessionHandle, DEFAULT_BROADCAST_CAPACITY, DEFAULT_INBOX_CAPACITY};
pub use queue::QueuedPlaybackDriver;
pub use runtime::VtpRuntime;
