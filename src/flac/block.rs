//! FLAC metadata blocks and the chain that carries them.
//!
//! Only STREAMINFO, VORBIS_COMMENT and PICTURE get their own variant. Everything else is an
//! opaque payload that is written back byte-for-byte.

use std::io::{self, Read, Write};

use tracing::warn;

use crate::error::MetadataError;

/// The four bytes every FLAC stream starts with.
pub const FLAC_MARKER: [u8; 4] = *b"fLaC";

/// Largest payload a block header can describe (24-bit length).
pub const MAX_BLOCK_LEN: usize = 0x00FF_FFFF;

pub const TYPE_STREAMINFO: u8 = 0;
pub const TYPE_PADDING: u8 = 1;
pub const TYPE_APPLICATION: u8 = 2;
pub const TYPE_SEEKTABLE: u8 = 3;
pub const TYPE_VORBIS_COMMENT: u8 = 4;
pub const TYPE_CUESHEET: u8 = 5;
pub const TYPE_PICTURE: u8 = 6;

const LAST_BLOCK_FLAG: u8 = 0b1000_0000;
const TYPE_MASK: u8 = 0b0111_1111;

/// Decoded 4-byte metadata block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: u8,
    pub is_last: bool,
    pub length: u32,
}

impl BlockHeader {
    pub fn parse(raw: [u8; 4]) -> Self {
        // Last-metadata-block flag lives in the high bit, the type in the low seven.
        Self {
            block_type: raw[0] & TYPE_MASK,
            is_last: raw[0] & LAST_BLOCK_FLAG != 0,
            length: u32::from_be_bytes([0, raw[1], raw[2], raw[3]]),
        }
    }

    pub fn encode(&self) -> [u8; 4] {
        let mut first = self.block_type & TYPE_MASK;
        if self.is_last {
            first |= LAST_BLOCK_FLAG;
        }
        let len = self.length.to_be_bytes();
        [first, len[1], len[2], len[3]]
    }
}

/// One link of the metadata chain.
///
/// The last-block flag is not stored; it is derived from position when the chain is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataBlock {
    StreamInfo(Vec<u8>),
    VorbisComment(Vec<u8>),
    Picture(Vec<u8>),
    Opaque { block_type: u8, data: Vec<u8> },
}

impl MetadataBlock {
    pub fn from_raw(block_type: u8, data: Vec<u8>) -> Self {
        match block_type {
            TYPE_STREAMINFO => MetadataBlock::StreamInfo(data),
            TYPE_VORBIS_COMMENT => MetadataBlock::VorbisComment(data),
            TYPE_PICTURE => MetadataBlock::Picture(data),
            other => MetadataBlock::Opaque {
                block_type: other,
                data,
            },
        }
    }

    pub fn block_type(&self) -> u8 {
        match self {
            MetadataBlock::StreamInfo(_) => TYPE_STREAMINFO,
            MetadataBlock::VorbisComment(_) => TYPE_VORBIS_COMMENT,
            MetadataBlock::Picture(_) => TYPE_PICTURE,
            MetadataBlock::Opaque { block_type, .. } => *block_type,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            MetadataBlock::StreamInfo(data)
            | MetadataBlock::VorbisComment(data)
            | MetadataBlock::Picture(data)
            | MetadataBlock::Opaque { data, .. } => data,
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Write header and payload.
    pub fn encode<W: Write>(&self, is_last: bool, out: &mut W) -> Result<(), MetadataError> {
        let len = self.len();
        if len > MAX_BLOCK_LEN {
            return Err(MetadataError::BlockTooLarge { len });
        }
        let header = BlockHeader {
            block_type: self.block_type(),
            is_last,
            // Bounded by MAX_BLOCK_LEN above.
            length: len as u32,
        };
        out.write_all(&header.encode())?;
        out.write_all(self.data())?;
        Ok(())
    }
}

/// The blocks read from a stream, plus whether reading stopped on a short block.
#[derive(Debug, Default)]
pub struct BlockChain {
    pub blocks: Vec<MetadataBlock>,
    pub truncated: bool,
}

/// Read the marker. `Ok(false)` means the stream is too short or not FLAC.
pub fn read_marker<R: Read>(read: &mut R) -> io::Result<bool> {
    let mut marker = [0u8; 4];
    match read.read_exact(&mut marker) {
        Ok(()) => Ok(marker == FLAC_MARKER),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read metadata blocks until the last-block flag or end of input.
///
/// A block whose declared length runs past the end of input ends the chain; the blocks read
/// before it are kept and `truncated` is set.
pub fn read_chain<R: Read>(read: &mut R) -> io::Result<BlockChain> {
    let mut chain = BlockChain::default();

    loop {
        let mut raw = [0u8; 4];
        match read_full(read, &mut raw)? {
            0 => break,
            4 => {}
            n => {
                warn!(bytes = n, "short metadata block header");
                chain.truncated = true;
                break;
            }
        }

        let header = BlockHeader::parse(raw);
        let mut data = Vec::with_capacity(header.length as usize);
        read.by_ref()
            .take(u64::from(header.length))
            .read_to_end(&mut data)?;

        if data.len() != header.length as usize {
            warn!(
                block_type = header.block_type,
                declared = header.length,
                available = data.len(),
                "failed to read complete metadata block"
            );
            chain.truncated = true;
            break;
        }

        chain
            .blocks
            .push(MetadataBlock::from_raw(header.block_type, data));

        if header.is_last {
            break;
        }
    }

    Ok(chain)
}

/// Write the marker followed by every block, flagging only the final one as last.
pub fn write_chain<W: Write>(blocks: &[MetadataBlock], out: &mut W) -> Result<(), MetadataError> {
    out.write_all(&FLAC_MARKER)?;
    let last = blocks.len().saturating_sub(1);
    for (i, block) in blocks.iter().enumerate() {
        block.encode(i == last, out)?;
    }
    Ok(())
}

// Like `read_exact`, but reports how many bytes were available instead of failing on EOF.
fn read_full<R: Read>(read: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn raw_block(block_type: u8, is_last: bool, data: &[u8]) -> Vec<u8> {
        let header = BlockHeader {
            block_type,
            is_last,
            length: data.len() as u32,
        };
        let mut out = header.encode().to_vec();
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn header_round_trips_flag_type_and_length() {
        let header = BlockHeader {
            block_type: TYPE_PICTURE,
            is_last: true,
            length: 0x01_02_03,
        };
        let raw = header.encode();
        assert_eq!(raw, [0x86, 0x01, 0x02, 0x03]);
        assert_eq!(BlockHeader::parse(raw), header);
    }

    #[test]
    fn unknown_types_stay_opaque() {
        let block = MetadataBlock::from_raw(TYPE_SEEKTABLE, vec![1, 2, 3]);
        assert_eq!(
            block,
            MetadataBlock::Opaque {
                block_type: TYPE_SEEKTABLE,
                data: vec![1, 2, 3]
            }
        );
        assert_eq!(block.block_type(), TYPE_SEEKTABLE);
    }

    #[test]
    fn chain_stops_after_last_block_and_leaves_payload_unread() -> anyhow::Result<()> {
        let mut bytes = raw_block(TYPE_STREAMINFO, false, &[0u8; 34]);
        bytes.extend(raw_block(TYPE_PADDING, true, &[0u8; 8]));
        bytes.extend_from_slice(b"AUDIO");

        let mut cursor = Cursor::new(bytes);
        let chain = read_chain(&mut cursor)?;
        assert_eq!(chain.blocks.len(), 2);
        assert!(!chain.truncated);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest)?;
        assert_eq!(rest, b"AUDIO");
        Ok(())
    }

    #[test]
    fn truncated_block_keeps_earlier_blocks() -> anyhow::Result<()> {
        let mut bytes = raw_block(TYPE_VORBIS_COMMENT, false, &[9u8; 12]);
        // Declares 100 bytes but only 3 follow.
        bytes.extend_from_slice(&[TYPE_PICTURE, 0, 0, 100, 1, 2, 3]);

        let chain = read_chain(&mut Cursor::new(bytes))?;
        assert!(chain.truncated);
        assert_eq!(chain.blocks, vec![MetadataBlock::VorbisComment(vec![9u8; 12])]);
        Ok(())
    }

    #[test]
    fn empty_input_is_an_empty_chain() -> anyhow::Result<()> {
        let chain = read_chain(&mut Cursor::new(Vec::new()))?;
        assert!(chain.blocks.is_empty());
        assert!(!chain.truncated);
        Ok(())
    }

    #[test]
    fn write_chain_flags_only_the_final_block() -> anyhow::Result<()> {
        let blocks = vec![
            MetadataBlock::StreamInfo(vec![0; 34]),
            MetadataBlock::Opaque {
                block_type: TYPE_APPLICATION,
                data: vec![7; 4],
            },
        ];
        let mut out = Vec::new();
        write_chain(&blocks, &mut out)?;

        assert_eq!(&out[..4], b"fLaC");
        assert_eq!(out[4], TYPE_STREAMINFO);
        assert_eq!(out[4 + 4 + 34], TYPE_APPLICATION | 0x80);
        Ok(())
    }

    #[test]
    fn oversized_blocks_are_rejected_on_write() {
        let block = MetadataBlock::Picture(vec![0; MAX_BLOCK_LEN + 1]);
        let err = block.encode(true, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, MetadataError::BlockTooLarge { .. }));
    }

    #[test]
    fn marker_check_handles_short_input() -> anyhow::Result<()> {
        assert!(read_marker(&mut Cursor::new(b"fLaC".to_vec()))?);
        assert!(!read_marker(&mut Cursor::new(b"fLa".to_vec()))?);
        assert!(!read_marker(&mut Cursor::new(b"RIFF".to_vec()))?);
        Ok(())
    }
}
