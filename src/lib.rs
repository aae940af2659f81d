//! Thread-safe blocking senders and receivers over a single-threaded,
//! credit flow-controlled messaging engine.
//!
//! The engine (see [`Core::Engine`]) owns every link and runs all link
//! callbacks and scheduled work on one thread. [`Link::Sender`] and
//! [`Link::Receiver`] let any number of application threads send and
//! receive through it: senders block while the engine grants no credit,
//! receivers block while their bounded buffer is empty and grant credit
//! back only as buffer space frees up.
//!
//! [`Core::LoopbackEngine`] is an in-process engine for tests and demos.

// Module naming follows project convention
#[allow(non_snake_case)]
pub mod Link;
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
mod Debug;
pub mod ffi;

pub use crate::Core::{Engine, ErrorCondition, LinkError, LoopbackConfig, LoopbackEngine};
pub use crate::Link::{LinkBuilder, LinkState, Message, Receiver, Sender};
