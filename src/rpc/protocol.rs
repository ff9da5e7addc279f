//! Peer link wire protocol.
//!
//! Every request is one fixed-size little-endian frame:
//!
//! ```text
//! 0        4          8        16       24       32
//! | kind   | reserved | arg0   | arg1   | arg2   |
//! ```
//!
//! | kind | request    | arg0            | arg1    | arg2      |
//! |------|------------|-----------------|---------|-----------|
//! | 0    | Create     | address hint    | length  | page size |
//! | 1    | Invalidate | page index      | -       | -         |
//! | 2    | Fetch      | page index      | -       | -         |
//! | 3    | Hello      | connect retries | nonce   | -         |
//!
//! Only Fetch is answered: one status byte, followed by exactly one page when
//! the status is [`FETCH_REPLY_PAGE`].

use std::io::{Read, Write};

use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::helpers::read_exact_or_disconnect;
use crate::constants::{FETCH_REPLY_ABSENT, FETCH_REPLY_PAGE, FRAME_SIZE};
use crate::error::{DsmError, DsmResult};
use crate::memory::RegionInfo;

/// Request kinds
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Map the shared region announced by the initiator
    Create = 0,
    /// Drop the local copy of a page
    Invalidate = 1,
    /// Return the current content of a page
    Fetch = 2,
    /// Bootstrap tie-break token, first frame on every outbound stream
    Hello = 3,
}

impl TryFrom<u32> for RequestKind {
    type Error = DsmError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(RequestKind::Create),
            1 => Ok(RequestKind::Invalidate),
            2 => Ok(RequestKind::Fetch),
            3 => Ok(RequestKind::Hello),
            other => Err(DsmError::MalformedFrame(format!(
                "unknown request kind {}",
                other
            ))),
        }
    }
}

/// Raw request frame as it appears on the wire
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RequestFrame {
    pub kind: U32<LittleEndian>,
    pub reserved: U32<LittleEndian>,
    pub arg0: U64<LittleEndian>,
    pub arg1: U64<LittleEndian>,
    pub arg2: U64<LittleEndian>,
}

const _: () = assert!(std::mem::size_of::<RequestFrame>() == FRAME_SIZE);

impl RequestFrame {
    fn new(kind: RequestKind, arg0: u64, arg1: u64, arg2: u64) -> Self {
        Self {
            kind: U32::new(kind as u32),
            reserved: U32::new(0),
            arg0: U64::new(arg0),
            arg1: U64::new(arg1),
            arg2: U64::new(arg2),
        }
    }
}

/// Bootstrap tie-break token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloToken {
    /// How many outbound connection attempts failed before one succeeded
    pub connect_retries: u64,
    /// Random value breaking ties between equal retry classifications
    pub nonce: u64,
}

impl HelloToken {
    pub fn new(connect_retries: u64) -> Self {
        Self {
            connect_retries,
            nonce: rand::random(),
        }
    }

    pub fn needed_retry(&self) -> bool {
        self.connect_retries > 0
    }
}

/// Decoded peer request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRequest {
    Create(RegionInfo),
    Invalidate { page: u64 },
    Fetch { page: u64 },
    Hello(HelloToken),
}

impl PeerRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            PeerRequest::Create(_) => RequestKind::Create,
            PeerRequest::Invalidate { .. } => RequestKind::Invalidate,
            PeerRequest::Fetch { .. } => RequestKind::Fetch,
            PeerRequest::Hello(_) => RequestKind::Hello,
        }
    }

    pub fn to_frame(&self) -> RequestFrame {
        match *self {
            PeerRequest::Create(info) => RequestFrame::new(
                RequestKind::Create,
                info.address as u64,
                info.length as u64,
                info.page_size as u64,
            ),
            PeerRequest::Invalidate { page } => {
                RequestFrame::new(RequestKind::Invalidate, page, 0, 0)
            }
            PeerRequest::Fetch { page } => RequestFrame::new(RequestKind::Fetch, page, 0, 0),
            PeerRequest::Hello(token) => RequestFrame::new(
                RequestKind::Hello,
                token.connect_retries,
                token.nonce,
                0,
            ),
        }
    }

    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf.copy_from_slice(self.to_frame().as_bytes());
        buf
    }

    /// Decode one frame. Unknown kinds yield [`DsmError::MalformedFrame`].
    pub fn decode(bytes: &[u8; FRAME_SIZE]) -> DsmResult<Self> {
        let frame = RequestFrame::read_from_bytes(&bytes[..])
            .map_err(|_| DsmError::MalformedFrame("short frame".to_string()))?;

        let request = match RequestKind::try_from(frame.kind.get())? {
            RequestKind::Create => PeerRequest::Create(RegionInfo {
                address: frame.arg0.get() as usize,
                length: frame.arg1.get() as usize,
                page_size: frame.arg2.get() as usize,
            }),
            RequestKind::Invalidate => PeerRequest::Invalidate {
                page: frame.arg0.get(),
            },
            RequestKind::Fetch => PeerRequest::Fetch {
                page: frame.arg0.get(),
            },
            RequestKind::Hello => PeerRequest::Hello(HelloToken {
                connect_retries: frame.arg0.get(),
                nonce: frame.arg1.get(),
            }),
        };
        Ok(request)
    }
}

/// Answer to a Fetch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchReply {
    /// The responder holds no data for the page
    Absent,
    /// Full page content
    Page(Vec<u8>),
}

impl FetchReply {
    /// Write the reply. A `Page` must be exactly one page long.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> DsmResult<()> {
        match self {
            FetchReply::Absent => writer.write_all(&[FETCH_REPLY_ABSENT])?,
            FetchReply::Page(data) => {
                writer.write_all(&[FETCH_REPLY_PAGE])?;
                writer.write_all(data)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Read one reply for a page of `page_size` bytes
    pub fn read_from<R: Read>(reader: &mut R, page_size: usize) -> DsmResult<Self> {
        let mut tag = [0u8; 1];
        read_exact_or_disconnect(reader, &mut tag)?;

        match tag[0] {
            FETCH_REPLY_ABSENT => Ok(FetchReply::Absent),
            FETCH_REPLY_PAGE => {
                let mut data = vec![0u8; page_size];
                read_exact_or_disconnect(reader, &mut data)?;
                Ok(FetchReply::Page(data))
            }
            other => Err(DsmError::MalformedFrame(format!(
                "unknown fetch reply tag {:#04x}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let bytes = PeerRequest::Fetch { page: 3 }.encode();
        assert_eq!(bytes.len(), FRAME_SIZE);
        // kind 2, little endian, then zero reserved
        assert_eq!(&bytes[0..8], &[2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &3u64.to_le_bytes());
        assert!(bytes[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_create_carries_geometry() {
        let info = RegionInfo {
            address: 0x7f00_0000_0000,
            length: 4 * 4096,
            page_size: 4096,
        };
        let decoded = PeerRequest::decode(&PeerRequest::Create(info).encode()).unwrap();
        assert_eq!(decoded, PeerRequest::Create(info));
        assert_eq!(decoded.kind(), RequestKind::Create);
    }

    #[test]
    fn test_hello_token() {
        let token = HelloToken::new(2);
        assert!(token.needed_retry());
        assert!(!HelloToken::new(0).needed_retry());

        let decoded = PeerRequest::decode(&PeerRequest::Hello(token).encode()).unwrap();
        assert_eq!(decoded, PeerRequest::Hello(token));
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let mut bytes = PeerRequest::Invalidate { page: 1 }.encode();
        bytes[0] = 42;
        assert!(matches!(
            PeerRequest::decode(&bytes),
            Err(DsmError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_fetch_reply_page() {
        let mut data = vec![0u8; 64];
        data[..5].copy_from_slice(b"hello");

        let mut wire = Vec::new();
        FetchReply::Page(data.clone()).write_to(&mut wire).unwrap();
        assert_eq!(wire.len(), 65);
        assert_eq!(wire[0], FETCH_REPLY_PAGE);

        let reply = FetchReply::read_from(&mut Cursor::new(wire), 64).unwrap();
        assert_eq!(reply, FetchReply::Page(data));
    }

    #[test]
    fn test_fetch_reply_absent_is_one_byte() {
        let mut wire = Vec::new();
        FetchReply::Absent.write_to(&mut wire).unwrap();
        assert_eq!(wire, vec![FETCH_REPLY_ABSENT]);

        let reply = FetchReply::read_from(&mut Cursor::new(wire), 4096).unwrap();
        assert_eq!(reply, FetchReply::Absent);
    }

    #[test]
    fn test_page_starting_with_sentinel_value_is_not_absent() {
        let mut data = vec![0u8; 16];
        data[0] = FETCH_REPLY_ABSENT;

        let mut wire = Vec::new();
        FetchReply::Page(data.clone()).write_to(&mut wire).unwrap();
        let reply = FetchReply::read_from(&mut Cursor::new(wire), 16).unwrap();
        assert_eq!(reply, FetchReply::Page(data));
    }

    #[test]
    fn test_truncated_reply_is_disconnect() {
        let wire = vec![FETCH_REPLY_PAGE, 1, 2, 3];
        let result = FetchReply::read_from(&mut Cursor::new(wire), 16);
        assert!(matches!(result, Err(DsmError::PeerDisconnected)));
    }
}
