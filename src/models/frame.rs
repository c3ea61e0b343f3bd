// Data structures for video frames handed to the detector

/// A decodable image frame with its capture timestamp
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Monotonic capture timestamp in milliseconds
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

/// Pixel format of incoming frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

/// Result of a non-blocking poll for the next frame
///
/// `NotReady` is expected while the upstream provider is still buffering;
/// the detection loop retries on its next tick.
#[derive(Debug, Clone)]
pub enum FramePoll {
    Ready(VideoFrame),
    NotReady,
}
