//! Application-level framing carried inside each binary transport message.

pub mod header;

pub use header::{FRAME_HEADER_LEN, FrameHeader};
