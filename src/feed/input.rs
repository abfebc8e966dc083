//! Reading packets from a live feed

use std::time::Duration;

use super::error::FeedError;
use super::frame::{FrameHeader, FrameUnpacker};
use super::log::{FeedCursor, FeedLog, ReadNext};
use crate::media::{Packet, SeekHint};

/// Outcome of pulling from a feed
#[derive(Debug, PartialEq, Eq)]
pub enum FeedPull {
    Packet(Packet),
    /// No complete packet is available yet
    Pending,
    /// Frames were lost (the reader was lapped or hit a damaged frame).
    /// Packets resume at the next frame with a packet start.
    Discontinuity,
}

/// Packet reader over a [`FeedLog`]
///
/// The reader does not own the log; the registry does, and the writer may
/// append between calls.
#[derive(Debug)]
pub struct FeedInput {
    cursor: FeedCursor,
    unpacker: FrameUnpacker,
}

impl FeedInput {
    /// Open a reader at the live edge or some time behind it
    pub fn open(log: &FeedLog, seek: SeekHint) -> Result<Self, FeedError> {
        let cursor = match seek {
            SeekHint::Live => log.tail_open(0),
            SeekHint::Offset(behind) => seek_behind(log, behind)?,
        };
        Ok(Self {
            cursor,
            unpacker: FrameUnpacker::new(),
        })
    }

    /// Pull the next packet
    pub fn read_packet(&mut self, log: &FeedLog) -> Result<FeedPull, FeedError> {
        loop {
            if let Some(packet) = self.unpacker.next_packet() {
                return Ok(FeedPull::Packet(packet));
            }

            match log.read_next(&mut self.cursor)? {
                ReadNext::Pending => return Ok(FeedPull::Pending),
                ReadNext::Overrun => {
                    tracing::debug!(
                        path = %log.path().display(),
                        seq = self.cursor.seq(),
                        "Reader overrun, skipping to live edge"
                    );
                    log.resync(&mut self.cursor);
                    self.unpacker.reset();
                    return Ok(FeedPull::Discontinuity);
                }
                ReadNext::Frame(frame) => {
                    if let Err(e) = self.unpacker.push_frame(&frame) {
                        tracing::warn!(
                            path = %log.path().display(),
                            error = %e,
                            "Damaged feed frame"
                        );
                        self.unpacker.reset();
                        return Ok(FeedPull::Discontinuity);
                    }
                }
            }
        }
    }
}

/// Find the newest frame with a packet start at least `behind` older than
/// the newest frame in the log. Falls back to the oldest such frame.
fn seek_behind(log: &FeedLog, behind: Duration) -> Result<FeedCursor, FeedError> {
    let behind_ms = i64::try_from(behind.as_millis()).unwrap_or(i64::MAX);
    let stored = log.stored_frames();
    let mut newest_ts = None;
    let mut oldest_start = None;

    for back in 1..=stored {
        let cursor = log.tail_open(back);
        let frame = match log.peek(&cursor)? {
            ReadNext::Frame(frame) => frame,
            _ => break,
        };
        let header = match FrameHeader::read(&frame) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let newest: i64 = *newest_ts.get_or_insert(header.timestamp);
        if !header.has_packet_start() {
            continue;
        }
        oldest_start = Some(cursor);
        if header.timestamp <= newest.saturating_sub(behind_ms) {
            return Ok(cursor);
        }
    }

    Ok(oldest_start.unwrap_or_else(|| log.tail_open(0)))
}
