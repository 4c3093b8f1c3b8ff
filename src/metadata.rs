// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FLAC metadata block parsing: STREAMINFO, VORBIS_COMMENT, and the
//! `METADATA_BLOCK_PICTURE` tag carried inside a VORBIS_COMMENT.
//!
//! Each call to [`MetadataParser::parse_block`] consumes exactly one metadata block header and
//! body from the bytes given to it, mirroring a design where each Ogg packet in the metadata
//! section of the stream holds exactly one FLAC metadata block.

use crate::bitreader::BitReaderLtr;
use crate::error::{decode_error, Result};

/// Decoded contents of a STREAMINFO block (FLAC metadata block type 0).
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub total_samples: u64,
}

impl StreamInfo {
    /// A STREAMINFO block body is always exactly 34 bytes.
    pub const SIZE: usize = 34;

    fn read(buf: &[u8]) -> Result<StreamInfo> {
        if buf.len() < StreamInfo::SIZE {
            return decode_error("flac: streaminfo block is truncated");
        }

        let min_block_size = u16::from_be_bytes([buf[0], buf[1]]);
        let max_block_size = u16::from_be_bytes([buf[2], buf[3]]);

        if max_block_size < min_block_size {
            return decode_error("flac: streaminfo max block size is less than min block size");
        }

        let min_frame_size = u32::from_be_bytes([0, buf[4], buf[5], buf[6]]);
        let max_frame_size = u32::from_be_bytes([0, buf[7], buf[8], buf[9]]);

        let mut bs = BitReaderLtr::new(&buf[10..18]);
        let sample_rate = bs.read_bits_leq32(20);
        let channels = bs.read_bits_leq32(3) + 1;
        let bits_per_sample = bs.read_bits_leq32(5) + 1;
        let total_samples = {
            let hi = u64::from(bs.read_bits_leq32(4));
            let lo = u64::from(bs.read_bits_leq32(32));
            (hi << 32) | lo
        };

        if sample_rate == 0 {
            return decode_error("flac: streaminfo sample rate is 0");
        }

        Ok(StreamInfo {
            min_block_size,
            max_block_size,
            min_frame_size,
            max_frame_size,
            sample_rate,
            channels,
            bits_per_sample,
            total_samples,
        })
    }
}

/// A location descriptor for a picture whose bytes live elsewhere in the stream, either a
/// standalone PICTURE metadata block (noted but not decoded here) or the value of a
/// `METADATA_BLOCK_PICTURE` Vorbis comment (base64-encoded FLAC PICTURE block data, captured by
/// file-relative byte range rather than decoded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureSpan {
    /// Offset from the start of the stream to the first byte of the picture payload.
    pub offset: u64,
    /// Number of bytes of picture payload present starting at `offset`.
    pub len: u64,
}

/// Tags captured out of a VORBIS_COMMENT block. Only the handful of well-known keys this
/// decoder's callers care about are captured; anything else in the comment list is skipped.
#[derive(Debug, Clone, Default)]
pub struct VorbisTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub track_number: Option<String>,
    pub comment: Option<String>,
    /// Set if a `METADATA_BLOCK_PICTURE` tag was present; its value is not decoded here, only
    /// bounded (see [`PictureSpan`]). The byte range recorded mirrors the reference decoder's
    /// arithmetic exactly, including that it begins at the tag's `=` separator rather than
    /// immediately after it.
    pub block_picture: Option<PictureSpan>,
    /// Of `block_picture`'s declared length, how many bytes were physically present in the
    /// metadata block just parsed. Less than `block_picture.len` when the tag's value is larger
    /// than fits in one Ogg packet and continues into later packets as raw payload.
    pub block_picture_bytes_present: u64,
}

impl VorbisTags {
    /// A display-friendly "Artist - Title" (or whichever half is present) stream title, the
    /// same rule this decoder's reference used to synthesize a single now-playing string.
    pub fn stream_title(&self) -> Option<String> {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => Some(format!("{} - {}", artist, title)),
            (Some(artist), None) => Some(artist.clone()),
            (None, Some(title)) => Some(title.clone()),
            (None, None) => None,
        }
    }
}

const TAG_NAMES: &[(&str, fn(&mut VorbisTags, String))] = &[
    ("title", |t, v| t.title = Some(v)),
    ("artist", |t, v| t.artist = Some(v)),
    ("album", |t, v| t.album = Some(v)),
    ("genre", |t, v| t.genre = Some(v)),
    ("date", |t, v| t.date = Some(v)),
    ("tracknumber", |t, v| t.track_number = Some(v)),
    ("comment", |t, v| t.comment = Some(v)),
];

const METADATA_BLOCK_PICTURE: &str = "METADATA_BLOCK_PICTURE";

/// Outcome of parsing one metadata block.
#[derive(Debug)]
pub enum MetadataBlock {
    StreamInfo(StreamInfo),
    VorbisComment(VorbisTags),
    /// PADDING, or any other accepted-but-unimplemented block type; the bytes were already
    /// accounted for by the caller via the block header's length field and nothing further
    /// needs to be done.
    Ignored,
}

/// Drives metadata-block-at-a-time parsing. `current_file_pos` must be advanced by the caller
/// to reflect the byte offset of the metadata block segment about to be parsed, so that any
/// `METADATA_BLOCK_PICTURE` span recorded is expressed in absolute stream offsets.
pub struct MetadataParser {
    pub is_last_block: bool,
}

impl Default for MetadataParser {
    fn default() -> Self {
        MetadataParser { is_last_block: false }
    }
}

impl MetadataParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses exactly one metadata block header plus body out of `segment`. `current_file_pos`
    /// is the absolute offset of `segment[0]` in the stream, needed to resolve
    /// `METADATA_BLOCK_PICTURE` spans to absolute byte ranges.
    pub fn parse_block(&mut self, segment: &[u8], current_file_pos: u64) -> Result<MetadataBlock> {
        if segment.len() < 4 {
            return decode_error("flac: metadata block header is truncated");
        }

        let header_byte = segment[0];
        self.is_last_block = header_byte & 0x80 != 0;
        let block_type = header_byte & 0x7f;

        let block_length =
            (usize::from(segment[1]) << 16) | (usize::from(segment[2]) << 8) | usize::from(segment[3]);

        if block_type == 4 {
            // A VORBIS_COMMENT block carrying a `METADATA_BLOCK_PICTURE` tag large enough to
            // embed cover art can be declared longer than fits in one Ogg packet. Whatever
            // arrived in `segment` is handed to the comment parser, which reports how much of
            // the picture value it actually saw; the caller carries the rest forward.
            let body = &segment[4..segment.len().min(4 + block_length)];
            return Ok(MetadataBlock::VorbisComment(read_vorbis_comment(body, current_file_pos + 4)?));
        }

        let body = segment.get(4..4 + block_length).ok_or(crate::error::Error::DecodeError(
            "flac: metadata block body is truncated",
        ))?;

        match block_type {
            0 => Ok(MetadataBlock::StreamInfo(StreamInfo::read(body)?)),
            1 => Ok(MetadataBlock::Ignored), // PADDING
            2 => decode_error("flac: application metadata blocks are not implemented"),
            3 => decode_error("flac: seek table metadata blocks are not implemented"),
            5 => decode_error("flac: cuesheet metadata blocks are not implemented"),
            6 => {
                // A standalone PICTURE block is noted but not decoded, matching the treatment
                // of the base64-carried form inside VORBIS_COMMENT.
                Ok(MetadataBlock::Ignored)
            }
            // Unknown block types (7-127, reserved) fall through to the STREAMINFO parser,
            // matching the reserved-type tolerance of the format this was derived from.
            _ => Ok(MetadataBlock::StreamInfo(StreamInfo::read(body)?)),
        }
    }
}

fn read_vorbis_comment(body: &[u8], comment_list_file_pos: u64) -> Result<VorbisTags> {
    let mut tags = VorbisTags::default();

    let mut pos = 0usize;

    let vendor_len = read_u32_le(body, pos)?;
    pos += 4 + vendor_len as usize;

    let comment_count = read_u32_le(body, pos)?;
    pos += 4;

    for _ in 0..comment_count {
        let comment_len = read_u32_le(body, pos)? as usize;

        // `comment_len` may claim more bytes than `body` actually holds: a `body` shorter than
        // its block's declared length means the metadata block's tail (almost always a large
        // `METADATA_BLOCK_PICTURE` value) continues in a later Ogg packet.
        let available = body.len().saturating_sub(pos + 4);
        let present_len = comment_len.min(available);
        let truncated = present_len < comment_len;
        let comment_bytes = &body[pos + 4..pos + 4 + present_len];

        if let Some(eq) = comment_bytes.iter().position(|&b| b == b'=') {
            let key = &comment_bytes[..eq];

            if key.eq_ignore_ascii_case(METADATA_BLOCK_PICTURE.as_bytes()) {
                // Mirrors the reference decoder's exact (slightly off-by-the-separator) byte
                // accounting: the recorded span starts right after the tag name, so it
                // includes the leading `=`.
                let tag_name_len = METADATA_BLOCK_PICTURE.len() as u64;
                let offset = comment_list_file_pos + pos as u64 + 4 + tag_name_len;
                let len = comment_len as u64 - tag_name_len;
                let present = present_len as u64 - tag_name_len;
                tags.block_picture = Some(PictureSpan { offset, len });
                tags.block_picture_bytes_present = present;
            } else if !truncated {
                let value = &comment_bytes[eq + 1..];

                for (name, setter) in TAG_NAMES {
                    if key.eq_ignore_ascii_case(name.as_bytes()) {
                        setter(&mut tags, String::from_utf8_lossy(value).into_owned());
                        break;
                    }
                }
            }
        }

        if truncated {
            // Nothing past this entry is present in this packet; later comments, if any, are
            // unreachable from here.
            break;
        }

        pos += 4 + comment_len;
    }

    Ok(tags)
}

fn read_u32_le(buf: &[u8], pos: usize) -> Result<u32> {
    let b = buf
        .get(pos..pos + 4)
        .ok_or(crate::error::Error::DecodeError("flac: metadata field is truncated"))?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
