//! Media handling
//!
//! This module provides the container boundary the server streams through:
//! - Stream descriptors and packets
//! - FLV muxing and file demuxing
//! - The set of output formats and their response properties

pub mod error;
pub mod flv;
pub mod format;
pub mod input;
pub mod muxer;
pub mod packet;

pub use error::MediaError;
pub use flv::{FlvDemuxer, FlvMuxer, FlvTag, FlvTagType};
pub use format::ContainerFormat;
pub use input::{open_file, MediaInput, SeekHint};
pub use muxer::Muxer;
pub use packet::{Codec, MediaKind, Packet, StreamDescriptor};
