//! Protocol module for decoding monitor notifications.

pub mod frame;

pub use frame::{decode, ActiveUserContext, DecodeResult, FrameKind};
