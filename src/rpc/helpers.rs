//! Common helper functions for peer link I/O
//!
//! Stream-level conventions shared by the client and the server:
//! - a short read (EOF mid-frame) means the peer is gone
//! - frames are always read and written whole

use std::io::{self, Read, Write};

use crate::constants::FRAME_SIZE;
use crate::error::{DsmError, DsmResult};

use super::protocol::PeerRequest;

/// `read_exact`, mapping EOF to [`DsmError::PeerDisconnected`]
pub fn read_exact_or_disconnect<R: Read>(reader: &mut R, buf: &mut [u8]) -> DsmResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => DsmError::PeerDisconnected,
        _ => DsmError::Io(e),
    })
}

/// Read one raw frame
pub fn read_frame<R: Read>(reader: &mut R) -> DsmResult<[u8; FRAME_SIZE]> {
    let mut buf = [0u8; FRAME_SIZE];
    read_exact_or_disconnect(reader, &mut buf)?;
    Ok(buf)
}

/// Encode and write one request frame
pub fn write_request<W: Write>(writer: &mut W, request: &PeerRequest) -> DsmResult<()> {
    writer.write_all(&request.encode())?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip_over_stream() {
        let mut wire = Vec::new();
        write_request(&mut wire, &PeerRequest::Invalidate { page: 9 }).unwrap();
        write_request(&mut wire, &PeerRequest::Fetch { page: 2 }).unwrap();
        assert_eq!(wire.len(), 2 * FRAME_SIZE);

        let mut cursor = Cursor::new(wire);
        let first = PeerRequest::decode(&read_frame(&mut cursor).unwrap()).unwrap();
        let second = PeerRequest::decode(&read_frame(&mut cursor).unwrap()).unwrap();
        assert_eq!(first, PeerRequest::Invalidate { page: 9 });
        assert_eq!(second, PeerRequest::Fetch { page: 2 });

        assert!(matches!(
            read_frame(&mut cursor),
            Err(DsmError::PeerDisconnected)
        ));
    }
}
