//! Feed relay output format
//!
//! Serving a stream in the feed format lets another server ingest it: the
//! body is a header frame followed by packed data frames, exactly what an
//! upload to a feed looks like.

use bytes::{BufMut, BytesMut};

use super::frame::{FeedHeader, FramePacker};
use crate::media::{MediaError, Muxer, Packet, StreamDescriptor};

/// Muxer producing the feed wire format
#[derive(Debug)]
pub struct FeedMuxer {
    streams: Vec<StreamDescriptor>,
    packer: FramePacker,
}

impl FeedMuxer {
    pub fn new(streams: Vec<StreamDescriptor>) -> Self {
        Self {
            streams,
            packer: FramePacker::new(),
        }
    }
}

impl Muxer for FeedMuxer {
    fn write_header(&mut self, sink: &mut BytesMut) -> Result<(), MediaError> {
        let frame = FeedHeader::new(self.streams.clone())
            .encode()
            .map_err(|e| MediaError::InvalidData(e.to_string()))?;
        sink.put_slice(&frame);
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet, sink: &mut BytesMut) -> Result<(), MediaError> {
        if packet.stream_index >= self.streams.len() {
            return Err(MediaError::UnknownStream(packet.stream_index));
        }
        self.packer.pack(packet, sink);
        Ok(())
    }

    fn write_trailer(&mut self, sink: &mut BytesMut) -> Result<(), MediaError> {
        self.packer.flush(sink);
        Ok(())
    }
}
