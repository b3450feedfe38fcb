//! Notification frame decoding.
//!
//! The monitor sends three kinds of frames on the measurement
//! characteristic. They are told apart by their leading bytes and their
//! exact length:
//!
//! | Kind    | Header  | Length | Contents                                       |
//! |---------|---------|--------|------------------------------------------------|
//! | Config  | `A5 02` | 13     | byte 10: display units (`0x01` = kPa)          |
//! | Reading | `A5 22` | 20     | byte 14: user, 15: systolic, 17: diastolic     |
//! | Pulse   | `00`    | 5      | byte 1: pulse, byte 3: `0x04` = irregular beat |
//!
//! A pulse frame carries no user field. It belongs to the user of the
//! reading frame before it, so the decoder is given an [`ActiveUserContext`]
//! that reading frames write and pulse frames read.

use tracing::{debug, trace};

use crate::data::{DisplayUnits, MeasurementChannel, MeasurementUpdate, MeasurementValue, UserSlot};

/// Irregular heartbeat marker in byte 3 of a pulse frame.
const IRREGULAR_HEARTBEAT_MARKER: u8 = 0x04;

/// The user slot the next pulse frame applies to.
///
/// Starts empty. Every reading frame overwrites it; nothing ever clears it,
/// so after a dropped frame or a reconnect it may be stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveUserContext {
    user: Option<UserSlot>,
}

impl ActiveUserContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current user slot, if a reading frame has been seen.
    pub fn current(&self) -> Option<UserSlot> {
        self.user
    }

    /// Set the current user slot.
    pub fn set(&mut self, user: UserSlot) {
        self.user = Some(user);
    }
}

/// Kind of frame, recognised by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Display configuration frame (`A5 02`).
    Config,
    /// Blood pressure reading frame (`A5 22`).
    Reading,
    /// Pulse and status frame (`00`).
    Pulse,
}

impl FrameKind {
    /// Identify a frame by its leading bytes.
    pub fn from_header(frame: &[u8]) -> Option<Self> {
        match frame {
            [0xA5, 0x02, ..] => Some(Self::Config),
            [0xA5, 0x22, ..] => Some(Self::Reading),
            [0x00, ..] => Some(Self::Pulse),
            _ => None,
        }
    }

    /// The length a frame of this kind must have.
    pub fn frame_len(&self) -> usize {
        match self {
            Self::Config => 13,
            Self::Reading => 20,
            Self::Pulse => 5,
        }
    }

    /// The shortest frame that still contains every field this kind reads.
    pub fn min_len(&self) -> usize {
        match self {
            Self::Config => 11,
            Self::Reading => 18,
            Self::Pulse => 4,
        }
    }
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// The frame is not one this decoder handles.
    Ignored,
    /// The header matched but the frame is too short to hold its fields.
    InvalidLength {
        /// Kind the header matched.
        kind: FrameKind,
        /// Actual frame length.
        len: usize,
    },
    /// Decoded channel updates, in frame order.
    Updates(Vec<MeasurementUpdate>),
}

impl DecodeResult {
    /// Get the decoded updates, or an empty slice.
    pub fn updates(&self) -> &[MeasurementUpdate] {
        match self {
            Self::Updates(updates) => updates,
            _ => &[],
        }
    }
}

/// Decode one notification frame.
///
/// Unrecognised frames are expected radio noise and are never an error. The
/// context is only written by a valid reading frame.
pub fn decode(context: &mut ActiveUserContext, frame: &[u8]) -> DecodeResult {
    let kind = match FrameKind::from_header(frame) {
        Some(kind) => kind,
        None => {
            trace!("Ignoring frame with unknown header: {:02X?}", frame);
            return DecodeResult::Ignored;
        }
    };

    if frame.len() < kind.min_len() {
        debug!(
            "Discarding truncated {:?} frame: {} bytes (need at least {})",
            kind,
            frame.len(),
            kind.min_len()
        );
        return DecodeResult::InvalidLength {
            kind,
            len: frame.len(),
        };
    }

    if frame.len() != kind.frame_len() {
        trace!(
            "Ignoring {:?}-like frame of {} bytes (expected {})",
            kind,
            frame.len(),
            kind.frame_len()
        );
        return DecodeResult::Ignored;
    }

    match kind {
        FrameKind::Config => decode_config(frame),
        FrameKind::Reading => decode_reading(context, frame),
        FrameKind::Pulse => decode_pulse(context, frame),
    }
}

fn decode_config(frame: &[u8]) -> DecodeResult {
    let units = DisplayUnits::from_raw(frame[10]);
    debug!("Display units: {}", units);
    DecodeResult::Updates(vec![(
        MeasurementChannel::DisplayUnits,
        MeasurementValue::Units(units),
    )])
}

fn decode_reading(context: &mut ActiveUserContext, frame: &[u8]) -> DecodeResult {
    // A selector outside 0..=1 would name a channel that does not exist.
    let Some(user) = UserSlot::from_raw(frame[14]) else {
        debug!("Ignoring reading frame for unknown user slot {}", frame[14]);
        return DecodeResult::Ignored;
    };
    context.set(user);

    let systolic = frame[15];
    let diastolic = frame[17];
    debug!(
        "Reading for user {}: {}/{} mmHg",
        user.display_number(),
        systolic,
        diastolic
    );

    DecodeResult::Updates(vec![
        (
            MeasurementChannel::Systolic(user),
            MeasurementValue::Integer(i32::from(systolic)),
        ),
        (
            MeasurementChannel::Diastolic(user),
            MeasurementValue::Integer(i32::from(diastolic)),
        ),
    ])
}

fn decode_pulse(context: &ActiveUserContext, frame: &[u8]) -> DecodeResult {
    let Some(user) = context.current() else {
        debug!("Ignoring pulse frame received before any reading frame");
        return DecodeResult::Ignored;
    };

    let pulse = frame[1];
    let irregular = frame[3] == IRREGULAR_HEARTBEAT_MARKER;
    debug!(
        "Pulse for user {}: {} bpm, irregular={}",
        user.display_number(),
        pulse,
        irregular
    );

    DecodeResult::Updates(vec![
        (
            MeasurementChannel::Pulse(user),
            MeasurementValue::Integer(i32::from(pulse)),
        ),
        (
            MeasurementChannel::IrregularHeartbeat(user),
            MeasurementValue::Flag(irregular),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn reading_frame(user: u8, systolic: u8, diastolic: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 20];
        frame[0] = 0xA5;
        frame[1] = 0x22;
        frame[14] = user;
        frame[15] = systolic;
        frame[17] = diastolic;
        frame
    }

    #[test]
    fn test_config_frame_kpa() {
        let frame = [
            0xA5, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
        ];
        let mut ctx = ActiveUserContext::new();

        assert_eq!(
            decode(&mut ctx, &frame),
            DecodeResult::Updates(vec![(
                MeasurementChannel::DisplayUnits,
                MeasurementValue::Units(DisplayUnits::KPa)
            )])
        );
        assert_eq!(ctx.current(), None);
    }

    #[test]
    fn test_config_frame_mmhg() {
        let mut frame = [0u8; 13];
        frame[0] = 0xA5;
        frame[1] = 0x02;
        frame[10] = 0x02;
        let mut ctx = ActiveUserContext::new();

        assert_eq!(
            decode(&mut ctx, &frame).updates(),
            &[(
                MeasurementChannel::DisplayUnits,
                MeasurementValue::Units(DisplayUnits::MmHg)
            )]
        );
    }

    #[test]
    fn test_reading_then_pulse() {
        let mut ctx = ActiveUserContext::new();

        let reading = [
            0xA5, 0x22, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x32, 0x00, 0x50, 0x00, 0x00,
        ];
        assert_eq!(
            decode(&mut ctx, &reading),
            DecodeResult::Updates(vec![
                (
                    MeasurementChannel::Systolic(UserSlot::One),
                    MeasurementValue::Integer(50)
                ),
                (
                    MeasurementChannel::Diastolic(UserSlot::One),
                    MeasurementValue::Integer(80)
                ),
            ])
        );
        assert_eq!(ctx.current(), Some(UserSlot::One));

        let pulse = [0x00, 0x46, 0x00, 0x04, 0x00];
        assert_eq!(
            decode(&mut ctx, &pulse),
            DecodeResult::Updates(vec![
                (
                    MeasurementChannel::Pulse(UserSlot::One),
                    MeasurementValue::Integer(70)
                ),
                (
                    MeasurementChannel::IrregularHeartbeat(UserSlot::One),
                    MeasurementValue::Flag(true)
                ),
            ])
        );
    }

    #[test]
    fn test_pulse_follows_latest_user() {
        let mut ctx = ActiveUserContext::new();
        decode(&mut ctx, &reading_frame(1, 130, 85));
        assert_eq!(ctx.current(), Some(UserSlot::Two));

        let result = decode(&mut ctx, &[0x00, 0x40, 0x00, 0x00, 0x00]);
        assert_eq!(
            result.updates(),
            &[
                (
                    MeasurementChannel::Pulse(UserSlot::Two),
                    MeasurementValue::Integer(64)
                ),
                (
                    MeasurementChannel::IrregularHeartbeat(UserSlot::Two),
                    MeasurementValue::Flag(false)
                ),
            ]
        );
    }

    #[test]
    fn test_pulse_without_user_is_ignored() {
        let mut ctx = ActiveUserContext::new();
        assert_eq!(
            decode(&mut ctx, &[0x00, 0x46, 0x00, 0x04, 0x00]),
            DecodeResult::Ignored
        );
    }

    #[test]
    fn test_unknown_user_slot_is_ignored() {
        let mut ctx = ActiveUserContext::new();
        ctx.set(UserSlot::Two);

        assert_eq!(decode(&mut ctx, &reading_frame(2, 120, 80)), DecodeResult::Ignored);
        assert_eq!(ctx.current(), Some(UserSlot::Two));
    }

    #[test]
    fn test_truncated_frames() {
        let mut ctx = ActiveUserContext::new();

        assert_eq!(
            decode(&mut ctx, &[0xA5, 0x22, 0x00, 0x00]),
            DecodeResult::InvalidLength {
                kind: FrameKind::Reading,
                len: 4
            }
        );
        assert_eq!(
            decode(&mut ctx, &[0xA5, 0x02]),
            DecodeResult::InvalidLength {
                kind: FrameKind::Config,
                len: 2
            }
        );
        assert_eq!(
            decode(&mut ctx, &[0x00, 0x46]),
            DecodeResult::InvalidLength {
                kind: FrameKind::Pulse,
                len: 2
            }
        );
        assert_eq!(ctx.current(), None);
    }

    #[test]
    fn test_wrong_length_is_ignored() {
        let mut ctx = ActiveUserContext::new();

        // Long enough to read every field, but not the exact length.
        let mut long_reading = reading_frame(0, 120, 80);
        long_reading.push(0x00);
        assert_eq!(decode(&mut ctx, &long_reading), DecodeResult::Ignored);
        assert_eq!(ctx.current(), None);

        assert_eq!(
            decode(&mut ctx, &[0x00, 0x46, 0x00, 0x04, 0x00, 0x00]),
            DecodeResult::Ignored
        );
    }

    #[test]
    fn test_unknown_header_is_ignored() {
        let mut ctx = ActiveUserContext::new();
        assert_eq!(decode(&mut ctx, &[]), DecodeResult::Ignored);
        assert_eq!(decode(&mut ctx, &[0xA5]), DecodeResult::Ignored);
        assert_eq!(decode(&mut ctx, &[0xA5, 0x33, 0, 0, 0]), DecodeResult::Ignored);
        assert_eq!(decode(&mut ctx, &[0x01, 0x46, 0x00, 0x04, 0x00]), DecodeResult::Ignored);
    }

    proptest! {
        #[test]
        fn prop_config_units(body in proptest::collection::vec(any::<u8>(), 11)) {
            let mut frame = vec![0xA5, 0x02];
            frame.extend_from_slice(&body);
            let mut ctx = ActiveUserContext::new();

            let expected = if frame[10] == 0x01 { DisplayUnits::KPa } else { DisplayUnits::MmHg };
            prop_assert_eq!(
                decode(&mut ctx, &frame),
                DecodeResult::Updates(vec![(
                    MeasurementChannel::DisplayUnits,
                    MeasurementValue::Units(expected)
                )])
            );
        }

        #[test]
        fn prop_reading_is_unscaled(
            body in proptest::collection::vec(any::<u8>(), 18),
            user in 0u8..=1,
        ) {
            let mut frame = vec![0xA5, 0x22];
            frame.extend_from_slice(&body);
            frame[14] = user;
            let mut ctx = ActiveUserContext::new();

            let slot = UserSlot::from_raw(user).unwrap();
            let result = decode(&mut ctx, &frame);
            prop_assert_eq!(ctx.current(), Some(slot));
            prop_assert_eq!(
                result.updates(),
                &[
                    (MeasurementChannel::Systolic(slot), MeasurementValue::Integer(i32::from(frame[15]))),
                    (MeasurementChannel::Diastolic(slot), MeasurementValue::Integer(i32::from(frame[17]))),
                ]
            );
        }

        #[test]
        fn prop_pulse_uses_current_user(body in proptest::collection::vec(any::<u8>(), 4), user in 0u8..=1) {
            let mut frame = vec![0x00];
            frame.extend_from_slice(&body);
            let slot = UserSlot::from_raw(user).unwrap();
            let mut ctx = ActiveUserContext::new();
            ctx.set(slot);

            let result = decode(&mut ctx, &frame);
            prop_assert_eq!(
                result.updates(),
                &[
                    (MeasurementChannel::Pulse(slot), MeasurementValue::Integer(i32::from(frame[1]))),
                    (MeasurementChannel::IrregularHeartbeat(slot), MeasurementValue::Flag(frame[3] == 0x04)),
                ]
            );
        }

        #[test]
        fn prop_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..32)) {
            let mut ctx = ActiveUserContext::new();
            ctx.set(UserSlot::One);
            let _ = decode(&mut ctx, &frame);
        }
    }
}
