// src/core/protocol/mod.rs

pub mod frame;
pub use frame::{CLOSE_PAYLOAD, DEFAULT_MAX_FRAME_SIZE, Frame, FrameCodec, PING_PAYLOAD};
