//! Elementary stream descriptors and packets
//!
//! These are the types that cross the boundary between inputs (feed tail,
//! FLV file) and muxers. A packet carries the codec payload only; container
//! framing is added and removed by the muxers and demuxers.

use bytes::Bytes;

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Codec identity of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    Hevc,
    /// AV1
    Av1,
    /// On2 VP6
    Vp6,
    /// Sorenson H.263
    H263,
    /// AAC
    Aac,
    /// MPEG-1 Layer 3
    Mp3,
    /// Linear PCM, little endian
    Pcm,
    /// Speex
    Speex,
}

impl Codec {
    /// Stream kind this codec belongs to
    pub fn kind(&self) -> MediaKind {
        match self {
            Codec::H264 | Codec::Hevc | Codec::Av1 | Codec::Vp6 | Codec::H263 => {
                MediaKind::Video
            }
            Codec::Aac | Codec::Mp3 | Codec::Pcm | Codec::Speex => MediaKind::Audio,
        }
    }

    /// Short lowercase name, as used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
            Codec::Av1 => "av1",
            Codec::Vp6 => "vp6",
            Codec::H263 => "h263",
            Codec::Aac => "aac",
            Codec::Mp3 => "mp3",
            Codec::Pcm => "pcm",
            Codec::Speex => "speex",
        }
    }

    /// Parse a codec name (case-insensitive, a few common aliases accepted)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Some(Codec::H264),
            "hevc" | "h265" => Some(Codec::Hevc),
            "av1" => Some(Codec::Av1),
            "vp6" => Some(Codec::Vp6),
            "h263" | "flv1" => Some(Codec::H263),
            "aac" => Some(Codec::Aac),
            "mp3" => Some(Codec::Mp3),
            "pcm" | "pcm_s16le" => Some(Codec::Pcm),
            "speex" => Some(Codec::Speex),
            _ => None,
        }
    }

    /// Wire identifier used in feed headers
    pub fn to_id(&self) -> u8 {
        match self {
            Codec::H264 => 1,
            Codec::Hevc => 2,
            Codec::Av1 => 3,
            Codec::Vp6 => 4,
            Codec::H263 => 5,
            Codec::Aac => 16,
            Codec::Mp3 => 17,
            Codec::Pcm => 18,
            Codec::Speex => 19,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Codec::H264),
            2 => Some(Codec::Hevc),
            3 => Some(Codec::Av1),
            4 => Some(Codec::Vp6),
            5 => Some(Codec::H263),
            16 => Some(Codec::Aac),
            17 => Some(Codec::Mp3),
            18 => Some(Codec::Pcm),
            19 => Some(Codec::Speex),
            _ => None,
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Description of one elementary stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Codec identity
    pub codec: Codec,
    /// Nominal bitrate in kbit/s (0 = unknown)
    pub bitrate: u32,
    /// Video width in pixels
    pub width: u16,
    /// Video height in pixels
    pub height: u16,
    /// Audio sample rate in Hz
    pub sample_rate: u32,
    /// Audio channel count
    pub channels: u8,
    /// Decoder configuration (AVCDecoderConfigurationRecord, AudioSpecificConfig, ...)
    pub extradata: Bytes,
}

impl StreamDescriptor {
    /// Describe a video stream
    pub fn video(codec: Codec, width: u16, height: u16, bitrate: u32) -> Self {
        Self {
            codec,
            bitrate,
            width,
            height,
            sample_rate: 0,
            channels: 0,
            extradata: Bytes::new(),
        }
    }

    /// Describe an audio stream
    pub fn audio(codec: Codec, sample_rate: u32, channels: u8, bitrate: u32) -> Self {
        Self {
            codec,
            bitrate,
            width: 0,
            height: 0,
            sample_rate,
            channels,
            extradata: Bytes::new(),
        }
    }

    /// Attach decoder configuration
    pub fn with_extradata(mut self, extradata: Bytes) -> Self {
        self.extradata = extradata;
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }

    /// Whether two descriptors can share one feed slot.
    ///
    /// Codec and bitrate must agree, plus the picture size for video or the
    /// sample format for audio. Extradata is not compared.
    pub fn matches(&self, other: &StreamDescriptor) -> bool {
        if self.codec != other.codec || self.bitrate != other.bitrate {
            return false;
        }
        match self.kind() {
            MediaKind::Video => self.width == other.width && self.height == other.height,
            MediaKind::Audio => {
                self.sample_rate == other.sample_rate && self.channels == other.channels
            }
        }
    }
}

/// One compressed media packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Index of the elementary stream within its input
    pub stream_index: usize,
    /// Presentation timestamp in milliseconds
    pub timestamp: i64,
    /// Whether a decoder can start at this packet
    pub keyframe: bool,
    /// Codec payload (shared, cheap to clone)
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream_index: usize, timestamp: i64, keyframe: bool, data: Bytes) -> Self {
        Self {
            stream_index,
            timestamp,
            keyframe,
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
