//! Feed wire format
//!
//! A feed is a sequence of fixed-size frames. The first frame is a header;
//! the rest carry a byte stream of packets that may straddle frame
//! boundaries. The same layout is used on disk, in upload bodies and in the
//! relay output format.
//!
//! ```text
//! header frame:  | "FEED" | frame_size u32 | write_offset u64 | max_size u64 |
//!                | stream_count u8 | descriptors... | zero padding |
//!
//! data frame:    | sync u16 | first_packet u16 | timestamp i64 | payload ... |
//!
//! packet:        | stream u8 | flags u8 | timestamp i64 | len u32 | data |
//! ```
//!
//! `first_packet` is the frame offset of the first packet header that starts
//! inside the frame (0 when the frame only continues an earlier packet), so a
//! reader can join at any frame. A stream byte of `0xFF` at a packet boundary
//! marks padding up to the end of the frame.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::FeedError;
use crate::media::{Codec, Packet, StreamDescriptor};

/// Size of every frame, header frame included
pub const FRAME_SIZE: usize = 4096;

/// Header frame magic
pub const FEED_MAGIC: [u8; 4] = *b"FEED";

/// Sync word opening every data frame
pub const FRAME_SYNC: u16 = 0x4650;

/// Bytes before the payload of a data frame
pub const FRAME_HEADER_LEN: usize = 12;

/// Byte position of the write offset marker inside the header frame
pub const WRITE_OFFSET_POS: u64 = 8;

const PACKET_HEADER_LEN: usize = 14;
const PADDING_MARKER: u8 = 0xFF;
const KEYFRAME_FLAG: u8 = 0x01;

/// Upper bound on a single packet, to catch a desynchronized stream early
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Decoded header frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedHeader {
    pub frame_size: u32,
    /// Published write offset (meaningful in log files only)
    pub write_offset: u64,
    /// Maximum log size (meaningful in log files only)
    pub max_size: u64,
    /// Elementary streams carried by the feed
    pub streams: Vec<StreamDescriptor>,
}

impl FeedHeader {
    pub fn new(streams: Vec<StreamDescriptor>) -> Self {
        Self {
            frame_size: FRAME_SIZE as u32,
            write_offset: 0,
            max_size: 0,
            streams,
        }
    }

    /// Encode into exactly one frame
    pub fn encode(&self) -> Result<Vec<u8>, FeedError> {
        if self.streams.len() >= PADDING_MARKER as usize {
            return Err(FeedError::BadHeader(format!(
                "{} streams is too many",
                self.streams.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(FRAME_SIZE);
        buf.put_slice(&FEED_MAGIC);
        buf.put_u32(self.frame_size);
        buf.put_u64(self.write_offset);
        buf.put_u64(self.max_size);
        buf.put_u8(self.streams.len() as u8);

        for desc in &self.streams {
            if desc.extradata.len() > u16::MAX as usize {
                return Err(FeedError::BadHeader("extradata too large".into()));
            }
            buf.put_u8(desc.codec.to_id());
            buf.put_u32(desc.bitrate);
            buf.put_u16(desc.width);
            buf.put_u16(desc.height);
            buf.put_u32(desc.sample_rate);
            buf.put_u8(desc.channels);
            buf.put_u16(desc.extradata.len() as u16);
            buf.put_slice(&desc.extradata);
        }

        if buf.len() > FRAME_SIZE {
            return Err(FeedError::BadHeader(format!(
                "stream descriptors need {} bytes, frame holds {}",
                buf.len(),
                FRAME_SIZE
            )));
        }
        buf.resize(FRAME_SIZE, 0);
        Ok(buf.to_vec())
    }

    pub fn decode(frame: &[u8]) -> Result<Self, FeedError> {
        let mut buf = frame;
        need(buf, 25)?;
        if buf[..4] != FEED_MAGIC {
            return Err(FeedError::BadHeader("missing FEED magic".into()));
        }
        buf.advance(4);
        let frame_size = buf.get_u32();
        let write_offset = buf.get_u64();
        let max_size = buf.get_u64();
        let count = buf.get_u8() as usize;

        let mut streams = Vec::with_capacity(count);
        for _ in 0..count {
            need(buf, 16)?;
            let codec_id = buf.get_u8();
            let codec = Codec::from_id(codec_id)
                .ok_or_else(|| FeedError::BadHeader(format!("unknown codec id {codec_id}")))?;
            let bitrate = buf.get_u32();
            let width = buf.get_u16();
            let height = buf.get_u16();
            let sample_rate = buf.get_u32();
            let channels = buf.get_u8();
            let extra_len = buf.get_u16() as usize;
            need(buf, extra_len)?;
            let extradata = Bytes::copy_from_slice(&buf[..extra_len]);
            buf.advance(extra_len);

            streams.push(StreamDescriptor {
                codec,
                bitrate,
                width,
                height,
                sample_rate,
                channels,
                extradata,
            });
        }

        Ok(Self {
            frame_size,
            write_offset,
            max_size,
            streams,
        })
    }
}

fn need(buf: &[u8], n: usize) -> Result<(), FeedError> {
    if buf.len() < n {
        Err(FeedError::BadHeader("truncated header".into()))
    } else {
        Ok(())
    }
}

/// Data frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Offset of the first packet starting in this frame, 0 if none
    pub first_packet: u16,
    /// Timestamp of that packet, or of the last packet started before it
    pub timestamp: i64,
}

impl FrameHeader {
    pub fn read(frame: &[u8]) -> Result<Self, FeedError> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(FeedError::BadFrame("short frame".into()));
        }
        let mut buf = frame;
        let sync = buf.get_u16();
        if sync != FRAME_SYNC {
            return Err(FeedError::BadFrame(format!("bad sync word {sync:#06x}")));
        }
        let first_packet = buf.get_u16();
        if first_packet != 0
            && ((first_packet as usize) < FRAME_HEADER_LEN || first_packet as usize >= frame.len())
        {
            return Err(FeedError::BadFrame(format!(
                "packet offset {first_packet} out of range"
            )));
        }
        Ok(Self {
            first_packet,
            timestamp: buf.get_i64(),
        })
    }

    pub fn has_packet_start(&self) -> bool {
        self.first_packet != 0
    }

    fn write(&self, frame: &mut [u8]) {
        let mut out = &mut frame[..FRAME_HEADER_LEN];
        out.put_u16(FRAME_SYNC);
        out.put_u16(self.first_packet);
        out.put_i64(self.timestamp);
    }
}

/// Serializes packets into frames
///
/// Complete frames are appended to the caller's sink; a partial frame is
/// held until more packets arrive or [`flush`](Self::flush) pads it out.
#[derive(Debug)]
pub struct FramePacker {
    frame: Vec<u8>,
    fill: usize,
    first_packet: u16,
    timestamp: i64,
}

impl FramePacker {
    pub fn new() -> Self {
        Self {
            frame: vec![0u8; FRAME_SIZE],
            fill: FRAME_HEADER_LEN,
            first_packet: 0,
            timestamp: 0,
        }
    }

    /// Queue one packet, emitting every frame it completes
    pub fn pack(&mut self, packet: &Packet, out: &mut BytesMut) {
        let mut header = [0u8; PACKET_HEADER_LEN];
        {
            let mut h = &mut header[..];
            h.put_u8(packet.stream_index as u8);
            h.put_u8(if packet.keyframe { KEYFRAME_FLAG } else { 0 });
            h.put_i64(packet.timestamp);
            h.put_u32(packet.data.len() as u32);
        }

        if self.first_packet == 0 {
            self.first_packet = self.fill as u16;
            self.timestamp = packet.timestamp;
        }
        self.write_bytes(&header, out);
        self.write_bytes(&packet.data, out);
    }

    /// Pad and emit the partial frame, if any
    pub fn flush(&mut self, out: &mut BytesMut) {
        if self.fill == FRAME_HEADER_LEN {
            return;
        }
        self.frame[self.fill] = PADDING_MARKER;
        self.frame[self.fill + 1..].fill(0);
        self.emit(out);
    }

    fn write_bytes(&mut self, mut bytes: &[u8], out: &mut BytesMut) {
        while !bytes.is_empty() {
            let n = (FRAME_SIZE - self.fill).min(bytes.len());
            self.frame[self.fill..self.fill + n].copy_from_slice(&bytes[..n]);
            self.fill += n;
            bytes = &bytes[n..];
            if self.fill == FRAME_SIZE {
                self.emit(out);
            }
        }
    }

    fn emit(&mut self, out: &mut BytesMut) {
        FrameHeader {
            first_packet: self.first_packet,
            timestamp: self.timestamp,
        }
        .write(&mut self.frame);
        out.put_slice(&self.frame);

        self.fill = FRAME_HEADER_LEN;
        self.first_packet = 0;
    }
}

impl Default for FramePacker {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembles packets from a sequence of frames
///
/// Until it has seen a frame with a packet start, the unpacker discards
/// continuation frames. After [`reset`](Self::reset) it resynchronizes the
/// same way.
#[derive(Debug, Default)]
pub struct FrameUnpacker {
    synced: bool,
    partial: BytesMut,
    expected: Option<usize>,
    ready: VecDeque<Packet>,
}

impl FrameUnpacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next frame in sequence
    pub fn push_frame(&mut self, frame: &[u8]) -> Result<(), FeedError> {
        let header = FrameHeader::read(frame)?;

        let mut pos = FRAME_HEADER_LEN;
        if !self.synced {
            if !header.has_packet_start() {
                return Ok(());
            }
            pos = header.first_packet as usize;
            self.synced = true;
            self.partial.clear();
            self.expected = None;
        }

        while pos < frame.len() {
            if self.partial.is_empty() && frame[pos] == PADDING_MARKER {
                break;
            }

            let need = match self.expected {
                Some(total) => total - self.partial.len(),
                None => PACKET_HEADER_LEN - self.partial.len(),
            };
            let n = need.min(frame.len() - pos);
            self.partial.extend_from_slice(&frame[pos..pos + n]);
            pos += n;

            if self.expected.is_none() && self.partial.len() == PACKET_HEADER_LEN {
                let len = u32::from_be_bytes([
                    self.partial[10],
                    self.partial[11],
                    self.partial[12],
                    self.partial[13],
                ]) as usize;
                if len > MAX_PACKET_SIZE {
                    self.reset();
                    return Err(FeedError::BadFrame(format!("packet of {len} bytes")));
                }
                self.expected = Some(PACKET_HEADER_LEN + len);
            }

            if self.expected == Some(self.partial.len()) {
                let packet = self.finish_packet();
                self.ready.push_back(packet);
            }
        }
        Ok(())
    }

    /// Next reassembled packet, if any
    pub fn next_packet(&mut self) -> Option<Packet> {
        self.ready.pop_front()
    }

    /// Drop all partial state and wait for the next packet start
    pub fn reset(&mut self) {
        self.synced = false;
        self.partial.clear();
        self.expected = None;
        self.ready.clear();
    }

    fn finish_packet(&mut self) -> Packet {
        let mut buf = std::mem::take(&mut self.partial);
        let data = buf.split_off(PACKET_HEADER_LEN).freeze();
        self.expected = None;

        let stream_index = buf.get_u8() as usize;
        let flags = buf.get_u8();
        let timestamp = buf.get_i64();
        Packet::new(stream_index, timestamp, flags & KEYFRAME_FLAG != 0, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(index: usize, ts: i64, len: usize) -> Packet {
        Packet::new(index, ts, ts % 1000 == 0, Bytes::from(vec![(ts % 251) as u8; len]))
    }

    #[test]
    fn test_header_encode_decode() {
        let header = FeedHeader {
            frame_size: FRAME_SIZE as u32,
            write_offset: 8192,
            max_size: 1 << 20,
            streams: vec![
                StreamDescriptor::video(Codec::H264, 640, 360, 800)
                    .with_extradata(Bytes::from_static(&[1, 2, 3])),
                StreamDescriptor::audio(Codec::Aac, 48000, 2, 128),
            ],
        };
        let frame = header.encode().unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(&frame[..4], b"FEED");
        assert_eq!(&frame[8..16], &8192u64.to_be_bytes());
        assert_eq!(FeedHeader::decode(&frame).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(FeedHeader::decode(b"NOPE").is_err());
        let mut frame = FeedHeader::new(vec![]).encode().unwrap();
        frame[0] = b'X';
        assert!(matches!(
            FeedHeader::decode(&frame),
            Err(FeedError::BadHeader(_))
        ));
    }

    #[test]
    fn test_header_overflow() {
        let big = StreamDescriptor::video(Codec::H264, 1, 1, 1)
            .with_extradata(Bytes::from(vec![0u8; FRAME_SIZE]));
        assert!(FeedHeader::new(vec![big]).encode().is_err());
    }

    #[test]
    fn test_packer_emits_only_full_frames() {
        let mut packer = FramePacker::new();
        let mut out = BytesMut::new();
        packer.pack(&packet(0, 0, 100), &mut out);
        assert!(out.is_empty());

        packer.flush(&mut out);
        assert_eq!(out.len(), FRAME_SIZE);
        let header = FrameHeader::read(&out).unwrap();
        assert_eq!(header.first_packet as usize, FRAME_HEADER_LEN);
        assert_eq!(out[FRAME_HEADER_LEN + 114], PADDING_MARKER);

        // nothing left to flush
        packer.flush(&mut out);
        assert_eq!(out.len(), FRAME_SIZE);
    }

    #[test]
    fn test_packets_spanning_frames() {
        let mut packer = FramePacker::new();
        let mut out = BytesMut::new();
        let packets: Vec<Packet> = (0..8).map(|i| packet(i % 2, i as i64 * 40, 1500)).collect();
        for p in &packets {
            packer.pack(p, &mut out);
        }
        packer.flush(&mut out);
        assert_eq!(out.len() % FRAME_SIZE, 0);

        let mut unpacker = FrameUnpacker::new();
        for frame in out.chunks(FRAME_SIZE) {
            unpacker.push_frame(frame).unwrap();
        }
        let decoded: Vec<Packet> = std::iter::from_fn(|| unpacker.next_packet()).collect();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn test_unpacker_joins_mid_stream() {
        let mut packer = FramePacker::new();
        let mut out = BytesMut::new();
        // first packet spans frames 0..2, then small packets
        packer.pack(&packet(0, 0, FRAME_SIZE * 2), &mut out);
        for i in 1..5 {
            packer.pack(&packet(0, i * 40, 10), &mut out);
        }
        packer.flush(&mut out);

        let frames: Vec<&[u8]> = out.chunks(FRAME_SIZE).collect();
        let mut unpacker = FrameUnpacker::new();
        // frame 1 is a pure continuation and must be skipped
        assert!(!FrameHeader::read(frames[1]).unwrap().has_packet_start());
        for frame in &frames[1..] {
            unpacker.push_frame(frame).unwrap();
        }
        let first = unpacker.next_packet().unwrap();
        assert_eq!(first.timestamp, 40);
    }

    #[test]
    fn test_unpacker_rejects_bad_sync() {
        let mut unpacker = FrameUnpacker::new();
        let frame = vec![0u8; FRAME_SIZE];
        assert!(matches!(
            unpacker.push_frame(&frame),
            Err(FeedError::BadFrame(_))
        ));
    }
}
