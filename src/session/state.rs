//! Connection state machine states

use tokio::io::Interest;

/// Where a connection is in its request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accumulating the request head
    AwaitRequest,
    /// Draining the staged response header (or complete page)
    SendHeader,
    /// Building the muxer and emitting the container header
    SendDataHeader,
    /// Pulling packets and streaming them out
    SendData,
    /// Emitting the container trailer, then closing
    SendDataTrailer,
    /// Appending uploaded frames to a feed
    ReceiveData,
    /// Parked until the feed's writer appends
    WaitForFeed,
}

impl ConnectionState {
    /// Name shown on the status page
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::AwaitRequest => "AWAIT_REQUEST",
            ConnectionState::SendHeader => "SEND_HEADER",
            ConnectionState::SendDataHeader => "SEND_DATA_HEADER",
            ConnectionState::SendData => "SEND_DATA",
            ConnectionState::SendDataTrailer => "SEND_DATA_TRAILER",
            ConnectionState::ReceiveData => "RECEIVE_DATA",
            ConnectionState::WaitForFeed => "WAIT_FEED",
        }
    }

    /// Socket readiness this state waits for. `None` means the connection
    /// is only advanced by a wakeup.
    pub fn interest(&self) -> Option<Interest> {
        match self {
            ConnectionState::AwaitRequest | ConnectionState::ReceiveData => Some(Interest::READABLE),
            ConnectionState::SendHeader
            | ConnectionState::SendDataHeader
            | ConnectionState::SendData
            | ConnectionState::SendDataTrailer => Some(Interest::WRITABLE),
            ConnectionState::WaitForFeed => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_by_state() {
        assert_eq!(
            ConnectionState::AwaitRequest.interest(),
            Some(Interest::READABLE)
        );
        assert_eq!(
            ConnectionState::ReceiveData.interest(),
            Some(Interest::READABLE)
        );
        assert_eq!(ConnectionState::SendData.interest(), Some(Interest::WRITABLE));
        assert_eq!(ConnectionState::WaitForFeed.interest(), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(ConnectionState::WaitForFeed.to_string(), "WAIT_FEED");
        assert_eq!(ConnectionState::SendDataTrailer.name(), "SEND_DATA_TRAILER");
    }
}
