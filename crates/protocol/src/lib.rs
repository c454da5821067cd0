//! Wire types for the kernel bridge channel.
//!
//! This crate contains the serde-serializable types exchanged between the
//! sandboxed UI process and the privileged host process over the bridge
//! message channel, plus the runtime records returned by the remote
//! control plane. These types represent the "protocol layer" - the shapes
//! of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * 1:1 with protocol: Match the host channel's message schema
//! * Stable: Changes only when the wire protocol changes
//!
//! Higher-level ergonomic APIs are built on top of these types in `kb-rs`.

pub mod channel;
pub mod payload;
pub mod runtime;

pub use channel::*;
pub use payload::*;
pub use runtime::*;
