//! Output side of the container boundary
//!
//! A muxer turns packets into container bytes appended to a caller-owned
//! `BytesMut`. The connection drains that sink into its socket buffer.

use bytes::BytesMut;

use super::error::MediaError;
use super::packet::Packet;

/// Container writer built from a list of stream descriptors
pub trait Muxer {
    /// Emit the container header (once, before any packet)
    fn write_header(&mut self, sink: &mut BytesMut) -> Result<(), MediaError>;

    /// Emit one packet. `packet.stream_index` indexes the muxer's streams.
    fn write_packet(&mut self, packet: &Packet, sink: &mut BytesMut) -> Result<(), MediaError>;

    /// Emit whatever closes the container (may be empty)
    fn write_trailer(&mut self, sink: &mut BytesMut) -> Result<(), MediaError>;
}
