//! FLV container: tag model, muxer and file demuxer
//!
//! FLV (Flash Video) is the container most HTTP live players accept for
//! progressive streaming. A file is a 9-byte header followed by tags, each
//! trailed by the size of the tag that precedes it.
//!
//! ```text
//! +============+==================+==============+==================+
//! | FLV Header | PrevTagSize0 (0) | Tag 1        | PrevTagSize1 ... |
//! | (9 bytes)  | (4 bytes)        | (11+N bytes) | (4 bytes)        |
//! +============+==================+==============+==================+
//! ```
//!
//! Tag bodies start with a codec header byte:
//! ```text
//! video: | FrameType (4 bits) | CodecID (4 bits) | [AVCPacketType, CTS(3)] | data
//! audio: | SoundFormat (4) | Rate (2) | Size (1) | Type (1) | [AACPacketType] | data
//! ```

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};

use super::error::MediaError;
use super::input::{MediaInput, SeekHint};
use super::muxer::Muxer;
use super::packet::{Codec, MediaKind, Packet, StreamDescriptor};

/// FLV file signature: "FLV" in ASCII
pub const FLV_SIGNATURE: [u8; 3] = *b"FLV";

/// FLV version (always 1)
const FLV_VERSION: u8 = 0x01;

/// FLV header is always 9 bytes
const FLV_HEADER_SIZE: u32 = 9;

const TAG_HEADER_SIZE: usize = 11;

/// Tags inspected when discovering the streams of a file
const SCAN_TAG_LIMIT: usize = 64;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    DisposableInterFrame = 3,
    GeneratedKeyframe = 4,
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    Avc = 7,
    /// Enhanced FLV codec id
    Hevc = 12,
    /// Enhanced FLV codec id
    Av1 = 13,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            13 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    fn to_codec(self) -> Option<Codec> {
        match self {
            VideoCodec::SorensonH263 => Some(Codec::H263),
            VideoCodec::Vp6 | VideoCodec::Vp6Alpha => Some(Codec::Vp6),
            VideoCodec::Avc => Some(Codec::H264),
            VideoCodec::Hevc => Some(Codec::Hevc),
            VideoCodec::Av1 => Some(Codec::Av1),
            VideoCodec::ScreenVideo | VideoCodec::ScreenVideoV2 => None,
        }
    }

    fn for_codec(codec: Codec) -> Option<Self> {
        match codec {
            Codec::H263 => Some(VideoCodec::SorensonH263),
            Codec::Vp6 => Some(VideoCodec::Vp6),
            Codec::H264 => Some(VideoCodec::Avc),
            Codec::Hevc => Some(VideoCodec::Hevc),
            Codec::Av1 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    /// AVC-style codecs carry a packet type and composition time after the first byte
    fn has_packet_type(self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc)
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser = 6,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            6 => Some(AudioFormat::Nellymoser),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            _ => None,
        }
    }

    fn to_codec(self) -> Option<Codec> {
        match self {
            AudioFormat::Mp3 | AudioFormat::Mp38k => Some(Codec::Mp3),
            AudioFormat::LinearPcmLe => Some(Codec::Pcm),
            AudioFormat::Aac => Some(Codec::Aac),
            AudioFormat::Speex => Some(Codec::Speex),
            _ => None,
        }
    }

    fn for_codec(codec: Codec) -> Option<Self> {
        match codec {
            Codec::Mp3 => Some(AudioFormat::Mp3),
            Codec::Pcm => Some(AudioFormat::LinearPcmLe),
            Codec::Aac => Some(AudioFormat::Aac),
            Codec::Speex => Some(AudioFormat::Speex),
            _ => None,
        }
    }
}

/// Audio sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampleRate {
    Rate5512 = 0,
    Rate11025 = 1,
    Rate22050 = 2,
    Rate44100 = 3,
}

impl AudioSampleRate {
    pub fn from_byte(b: u8) -> Self {
        match (b >> 2) & 0x03 {
            0 => AudioSampleRate::Rate5512,
            1 => AudioSampleRate::Rate11025,
            2 => AudioSampleRate::Rate22050,
            _ => AudioSampleRate::Rate44100,
        }
    }

    /// Nearest representable rate not above `hz` (44.1k for anything higher)
    pub fn from_hz(hz: u32) -> Self {
        match hz {
            0..=11024 => AudioSampleRate::Rate5512,
            11025..=22049 => AudioSampleRate::Rate11025,
            22050..=44099 => AudioSampleRate::Rate22050,
            _ => AudioSampleRate::Rate44100,
        }
    }

    pub fn to_hz(&self) -> u32 {
        match self {
            AudioSampleRate::Rate5512 => 5512,
            AudioSampleRate::Rate11025 => 11025,
            AudioSampleRate::Rate22050 => 22050,
            AudioSampleRate::Rate44100 => 44100,
        }
    }
}

/// One FLV tag
#[derive(Debug, Clone)]
pub struct FlvTag {
    /// Tag type
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (including codec headers)
    pub data: Bytes,
}

impl FlvTag {
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Audio,
            timestamp,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        if self.is_video() && !self.data.is_empty() {
            VideoFrameType::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        if self.is_video() && !self.data.is_empty() {
            VideoCodec::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        if self.is_audio() && !self.data.is_empty() {
            AudioFormat::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.video_frame_type()
            .map(|ft| ft.is_keyframe())
            .unwrap_or(false)
    }

    /// AVC/HEVC decoder configuration record or AAC AudioSpecificConfig
    pub fn is_sequence_header(&self) -> bool {
        if self.data.len() < 2 {
            return false;
        }
        match self.tag_type {
            FlvTagType::Video => self
                .video_codec()
                .map(|c| c.has_packet_type() && self.data[1] == 0)
                .unwrap_or(false),
            FlvTagType::Audio => self.audio_format() == Some(AudioFormat::Aac) && self.data[1] == 0,
            FlvTagType::Script => false,
        }
    }

    /// Length of the codec header that precedes the payload
    fn codec_header_len(&self) -> usize {
        match self.tag_type {
            FlvTagType::Video => match self.video_codec() {
                Some(c) if c.has_packet_type() => 5,
                _ => 1,
            },
            FlvTagType::Audio => match self.audio_format() {
                Some(AudioFormat::Aac) => 2,
                _ => 1,
            },
            FlvTagType::Script => 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Serialize the tag plus its trailing PreviousTagSize
    pub fn encode(&self, sink: &mut BytesMut) {
        let data_size = self.data.len() as u32;
        sink.reserve(TAG_HEADER_SIZE + self.data.len() + 4);

        sink.put_u8(self.tag_type.to_byte());
        // 24-bit size
        sink.put_slice(&data_size.to_be_bytes()[1..]);
        // lower 24 bits of the timestamp, then the extension byte
        sink.put_slice(&self.timestamp.to_be_bytes()[1..]);
        sink.put_u8((self.timestamp >> 24) as u8);
        // stream id, always 0
        sink.put_slice(&[0, 0, 0]);
        sink.put_slice(&self.data);
        sink.put_u32(TAG_HEADER_SIZE as u32 + data_size);
    }

    /// Read one tag (and its PreviousTagSize). `Ok(None)` on clean end of file.
    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Option<FlvTag>> {
        let mut header = [0u8; TAG_HEADER_SIZE];
        if !read_exact_or_eof(reader, &mut header)? {
            return Ok(None);
        }

        let tag_type = FlvTagType::from_byte(header[0]).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "unknown FLV tag type")
        })?;
        let data_size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);

        let mut data = vec![0u8; data_size];
        reader.read_exact(&mut data)?;

        // A truncated final PreviousTagSize still leaves a usable tag
        let mut prev = [0u8; 4];
        let _ = read_exact_or_eof(reader, &mut prev)?;

        Ok(Some(FlvTag {
            tag_type,
            timestamp,
            data: Bytes::from(data),
        }))
    }
}

/// Fill `buf` completely; `Ok(false)` if the reader was already at EOF
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn audio_header_byte(desc: &StreamDescriptor, format: AudioFormat) -> u8 {
    if format == AudioFormat::Aac {
        // AAC is always signalled as 44.1 kHz, 16-bit, stereo
        return 0xAF;
    }
    let rate = AudioSampleRate::from_hz(desc.sample_rate) as u8;
    let stereo = u8::from(desc.channels > 1);
    ((format as u8) << 4) | (rate << 2) | (1 << 1) | stereo
}

/// FLV muxer
///
/// Sequence headers are emitted right after the file header for every
/// stream that carries extradata. Timestamps are rebased so the first
/// packet starts at zero.
pub struct FlvMuxer {
    streams: Vec<StreamDescriptor>,
    base_timestamp: Option<i64>,
}

impl FlvMuxer {
    pub fn new(streams: Vec<StreamDescriptor>) -> Result<Self, MediaError> {
        for desc in &streams {
            let supported = match desc.kind() {
                MediaKind::Video => VideoCodec::for_codec(desc.codec).is_some(),
                MediaKind::Audio => AudioFormat::for_codec(desc.codec).is_some(),
            };
            if !supported {
                return Err(MediaError::UnsupportedCodec(desc.codec));
            }
        }
        Ok(Self {
            streams,
            base_timestamp: None,
        })
    }

    fn sequence_header(desc: &StreamDescriptor) -> Option<FlvTag> {
        if desc.extradata.is_empty() {
            return None;
        }
        let mut body = BytesMut::with_capacity(desc.extradata.len() + 5);
        match desc.kind() {
            MediaKind::Video => {
                let codec = VideoCodec::for_codec(desc.codec)?;
                if !codec.has_packet_type() {
                    return None;
                }
                body.put_u8(0x10 | codec as u8);
                body.put_slice(&[0, 0, 0, 0]);
                body.put_slice(&desc.extradata);
                Some(FlvTag::video(0, body.freeze()))
            }
            MediaKind::Audio => {
                let format = AudioFormat::for_codec(desc.codec)?;
                if format != AudioFormat::Aac {
                    return None;
                }
                body.put_u8(audio_header_byte(desc, format));
                body.put_u8(0);
                body.put_slice(&desc.extradata);
                Some(FlvTag::audio(0, body.freeze()))
            }
        }
    }
}

impl Muxer for FlvMuxer {
    fn write_header(&mut self, sink: &mut BytesMut) -> Result<(), MediaError> {
        let has_video = self.streams.iter().any(|s| s.kind() == MediaKind::Video);
        let has_audio = self.streams.iter().any(|s| s.kind() == MediaKind::Audio);
        let flags = (u8::from(has_audio) << 2) | u8::from(has_video);

        sink.put_slice(&FLV_SIGNATURE);
        sink.put_u8(FLV_VERSION);
        sink.put_u8(flags);
        sink.put_u32(FLV_HEADER_SIZE);
        // PreviousTagSize0
        sink.put_u32(0);

        for desc in &self.streams {
            if let Some(tag) = Self::sequence_header(desc) {
                tag.encode(sink);
            }
        }
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet, sink: &mut BytesMut) -> Result<(), MediaError> {
        let desc = self
            .streams
            .get(packet.stream_index)
            .ok_or(MediaError::UnknownStream(packet.stream_index))?;

        let base = *self.base_timestamp.get_or_insert(packet.timestamp);
        let timestamp = (packet.timestamp - base).clamp(0, u32::MAX as i64) as u32;

        let mut body = BytesMut::with_capacity(packet.data.len() + 5);
        let tag = match desc.kind() {
            MediaKind::Video => {
                let codec = VideoCodec::for_codec(desc.codec)
                    .ok_or(MediaError::UnsupportedCodec(desc.codec))?;
                let frame_type = if packet.keyframe {
                    VideoFrameType::Keyframe
                } else {
                    VideoFrameType::InterFrame
                };
                body.put_u8(((frame_type as u8) << 4) | codec as u8);
                if codec.has_packet_type() {
                    // NALU packet, composition time 0
                    body.put_slice(&[1, 0, 0, 0]);
                }
                body.put_slice(&packet.data);
                FlvTag::video(timestamp, body.freeze())
            }
            MediaKind::Audio => {
                let format = AudioFormat::for_codec(desc.codec)
                    .ok_or(MediaError::UnsupportedCodec(desc.codec))?;
                body.put_u8(audio_header_byte(desc, format));
                if format == AudioFormat::Aac {
                    body.put_u8(1);
                }
                body.put_slice(&packet.data);
                FlvTag::audio(timestamp, body.freeze())
            }
        };

        tag.encode(sink);
        Ok(())
    }

    fn write_trailer(&mut self, _sink: &mut BytesMut) -> Result<(), MediaError> {
        // FLV has no index or end marker
        Ok(())
    }
}

/// FLV file demuxer
///
/// Streams are discovered by probing the first tags of the file. Script
/// tags and sequence headers are consumed here and never surface as packets.
pub struct FlvDemuxer {
    reader: BufReader<File>,
    streams: Vec<StreamDescriptor>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    skip_before: Option<i64>,
}

impl FlvDemuxer {
    pub fn open(path: &Path, seek: SeekHint) -> Result<Self, MediaError> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; FLV_HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;
        if header[0..3] != FLV_SIGNATURE {
            return Err(MediaError::InvalidData(format!(
                "{} is not an FLV file",
                path.display()
            )));
        }
        let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
        let body_start = data_offset as u64 + 4;
        reader.seek(SeekFrom::Start(body_start))?;

        let mut demuxer = Self {
            reader,
            streams: Vec::new(),
            video_index: None,
            audio_index: None,
            skip_before: seek.offset_ms(),
        };
        demuxer.scan_streams()?;

        if demuxer.streams.is_empty() {
            return Err(MediaError::InvalidData(format!(
                "{} has no playable streams",
                path.display()
            )));
        }

        demuxer.reader.seek(SeekFrom::Start(body_start))?;
        Ok(demuxer)
    }

    fn scan_streams(&mut self) -> Result<(), MediaError> {
        for _ in 0..SCAN_TAG_LIMIT {
            let Some(tag) = FlvTag::read_from(&mut self.reader)? else {
                break;
            };
            match tag.tag_type {
                FlvTagType::Video => {
                    if self.video_index.is_none() {
                        if let Some(codec) = tag.video_codec().and_then(VideoCodec::to_codec) {
                            self.video_index = Some(self.streams.len());
                            self.streams.push(StreamDescriptor::video(codec, 0, 0, 0));
                        }
                    }
                    if tag.is_sequence_header() && tag.data.len() > 5 {
                        if let Some(i) = self.video_index {
                            self.streams[i].extradata = tag.data.slice(5..);
                        }
                    }
                }
                FlvTagType::Audio => {
                    if self.audio_index.is_none() {
                        if let Some(codec) = tag.audio_format().and_then(AudioFormat::to_codec) {
                            let byte = tag.data[0];
                            let rate = AudioSampleRate::from_byte(byte).to_hz();
                            let channels = if byte & 0x01 == 1 { 2 } else { 1 };
                            self.audio_index = Some(self.streams.len());
                            self.streams
                                .push(StreamDescriptor::audio(codec, rate, channels, 0));
                        }
                    }
                    if tag.is_sequence_header() && tag.data.len() > 2 {
                        if let Some(i) = self.audio_index {
                            self.streams[i].extradata = tag.data.slice(2..);
                        }
                    }
                }
                FlvTagType::Script => {}
            }
        }
        Ok(())
    }
}

impl MediaInput for FlvDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, MediaError> {
        loop {
            let Some(tag) = FlvTag::read_from(&mut self.reader)? else {
                return Ok(None);
            };

            let index = match tag.tag_type {
                FlvTagType::Video => self.video_index,
                FlvTagType::Audio => self.audio_index,
                FlvTagType::Script => None,
            };
            let Some(index) = index else {
                continue;
            };
            if tag.is_sequence_header() {
                continue;
            }
            let header_len = tag.codec_header_len();
            if tag.data.len() < header_len {
                continue;
            }

            let timestamp = tag.timestamp as i64;
            if let Some(min) = self.skip_before {
                if timestamp < min {
                    continue;
                }
                self.skip_before = None;
            }

            let keyframe = tag.is_audio() || tag.is_keyframe();
            return Ok(Some(Packet::new(
                index,
                timestamp,
                keyframe,
                tag.data.slice(header_len..),
            )));
        }
    }
}
