//! WAL frame encoding (§3.2, "WAL Frame (current format)"). Header is 5
//! bytes (`type:u8, page_id:u32`), payload length is derived from the frame
//! type rather than stored, and the 8-byte trailer is reserved/zero — this
//! format intentionally carries no per-frame checksum (§9).

pub const FRAME_HEADER_SIZE: usize = 5;
pub const FRAME_TRAILER_SIZE: usize = 8;
pub const MAX_FRAME_HEADER_SIZE: usize = FRAME_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Page = 1,
    Commit = 2,
    Checkpoint = 3,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Page),
            2 => Some(Self::Commit),
            3 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Payload length for this frame type; `page_size` only matters for
    /// `Page` frames.
    pub fn payload_len(self, page_size: usize) -> usize {
        match self {
            FrameType::Page => page_size,
            FrameType::Commit => 0,
            FrameType::Checkpoint => 8,
        }
    }
}

fn encode(frame_type: FrameType, page_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + FRAME_TRAILER_SIZE);
    buf.push(frame_type as u8);
    buf.extend_from_slice(&page_id.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&[0u8; FRAME_TRAILER_SIZE]);
    buf
}

pub fn encode_page_frame(page_id: u32, bytes: &[u8]) -> Vec<u8> {
    encode(FrameType::Page, page_id, bytes)
}

pub fn encode_commit_frame() -> Vec<u8> {
    encode(FrameType::Commit, 0, &[])
}

pub fn encode_checkpoint_frame(safe_lsn: u64) -> Vec<u8> {
    encode(FrameType::Checkpoint, 0, &safe_lsn.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_frame_round_trip_lengths() {
        let frame = encode_page_frame(5, &[1u8; 16]);
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 16 + FRAME_TRAILER_SIZE);
        assert_eq!(frame[0], FrameType::Page as u8);
        assert_eq!(u32::from_le_bytes(frame[1..5].try_into().unwrap()), 5);
    }

    #[test]
    fn commit_frame_has_no_payload() {
        let frame = encode_commit_frame();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE);
    }

    #[test]
    fn checkpoint_frame_carries_safe_lsn() {
        let frame = encode_checkpoint_frame(0xABCD);
        let payload = &frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + 8];
        assert_eq!(u64::from_le_bytes(payload.try_into().unwrap()), 0xABCD);
    }
}
