use tracing::instrument;

use crate::error::FrameError;
use crate::protocol::FRAME_HEADER_LEN;

const LENGTH_OFFSET: usize = 3;
const CHECKSUM_SEED: u32 = 0x1_0000;

/// Running-sum checksum used by JBD frames.
///
/// The checksum covers the length byte and the `L` payload bytes that follow
/// it: starting from `0x10000`, each covered byte is subtracted and the result
/// is masked to 16 bits. It is stored big-endian right after the payload.
pub struct ChecksumCodec;

impl ChecksumCodec {
    /// Computes the checksum over bytes `[3, 3 + L]` of `frame`.
    ///
    /// ```
    /// use bmspoll::ChecksumCodec;
    ///
    /// let frame = [0xDD, 0x04, 0x00, 0x02, 0x0D, 0x48, 0xFF, 0xA9, 0x77];
    /// assert_eq!(Ok(0xFFA9), ChecksumCodec::checksum(&frame));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] when the frame ends before its
    /// declared payload does.
    pub fn checksum(frame: &[u8]) -> Result<u16, FrameError> {
        let payload_len = declared_payload_len(frame)?;
        let covered_end = LENGTH_OFFSET + payload_len;
        let covered = frame
            .get(LENGTH_OFFSET..=covered_end)
            .ok_or(FrameError::Truncated {
                needed: covered_end + 1,
                actual: frame.len(),
            })?;

        let sum = covered
            .iter()
            .fold(CHECKSUM_SEED, |acc, byte| acc.wrapping_sub(u32::from(*byte)));
        Ok((sum & 0xFFFF) as u16)
    }

    /// Returns the checksum stored in the frame at offset `L + 4`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] when the checksum bytes are missing.
    pub fn stored(frame: &[u8]) -> Result<u16, FrameError> {
        let offset = declared_payload_len(frame)? + FRAME_HEADER_LEN;
        match frame.get(offset..offset + 2) {
            Some(&[high, low]) => Ok(u16::from_be_bytes([high, low])),
            _ => Err(FrameError::Truncated {
                needed: offset + 2,
                actual: frame.len(),
            }),
        }
    }

    /// Validates the stored checksum against a recomputed one.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ChecksumMismatch`] carrying both values when they
    /// differ, or [`FrameError::Truncated`] for short frames.
    #[instrument(skip(frame), level = "trace", fields(frame_len = frame.len()))]
    pub fn validate(frame: &[u8]) -> Result<(), FrameError> {
        let received = Self::stored(frame)?;
        let computed = Self::checksum(frame)?;
        if received != computed {
            return Err(FrameError::ChecksumMismatch { received, computed });
        }
        Ok(())
    }

    /// Returns whether the frame carries a correct checksum.
    #[must_use]
    pub fn is_valid(frame: &[u8]) -> bool {
        Self::validate(frame).is_ok()
    }
}

fn declared_payload_len(frame: &[u8]) -> Result<usize, FrameError> {
    frame
        .get(LENGTH_OFFSET)
        .map(|len| usize::from(*len))
        .ok_or(FrameError::Truncated {
            needed: FRAME_HEADER_LEN,
            actual: frame.len(),
        })
}
