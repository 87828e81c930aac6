//! Switch-facing side of the engine
//!
//! An adapter that speaks the switch protocol feeds connection and
//! packet-in events to [`MtdController`] and applies what comes back:
//! rule lists, packet-outs, and [`RuleUpdate`]s from the sync task.

pub mod app;
pub mod events;

pub use app::{ControllerStats, ControllerStatsSnapshot, MtdController};
pub use events::{PacketDisposition, PacketMetadata, PacketOut, PortNo, RuleUpdate, SwitchId};
