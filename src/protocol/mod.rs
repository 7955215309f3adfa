//! Wire protocol shared by the host and the plugin.
//!
//! Every call is one length-prefixed JSON frame in each direction over a
//! single loopback TCP connection. Only one call is in flight at a time, so
//! response N always answers request N; the id is carried anyway so either
//! side can detect a desynchronised stream.

pub mod codec;
pub mod frame;

pub use codec::{CodecError, HostCodec, JsonFrameCodec, PluginCodec};
pub use frame::{CallRequest, CallResponse, Outcome, TextPayload};

use std::net::SocketAddr;

/// Prefix of the line a plugin writes to stdout once its listener is bound.
pub const READY_MARKER: &str = "READY";

/// Default cap on a single frame's payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

pub fn format_ready_line(addr: SocketAddr) -> String {
    format!("{READY_MARKER} {addr}\n")
}

/// Parses a `READY <addr>` line. Any other line yields `None`.
pub fn parse_ready_line(line: &str) -> Option<SocketAddr> {
    let rest = line.trim().strip_prefix(READY_MARKER)?;
    rest.trim().parse().ok()
}
