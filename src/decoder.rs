// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The top-level streaming driver: a cooperative state machine that decodes native FLAC or
//! Ogg-FLAC a suspension point at a time, handing control back to the caller whenever it needs
//! more input or more output space than it was given.

use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::bitreader::BitReaderLtr;
use crate::frame::{self, ChannelAssignment, FrameHeader};
use crate::metadata::{MetadataBlock, MetadataParser, PictureSpan, VorbisTags};
use crate::ogg;
use crate::subframe;

/// The largest block size (in samples per channel) this driver will accept without having seen
/// a STREAMINFO or explicit [`FlacDriver::set_raw_block_params`] call pin a smaller bound.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Status returned by [`FlacDriver::decode`] after each call, describing what the caller should
/// do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A full step of work completed normally; no output was produced this call (for example,
    /// a metadata block or frame header was parsed).
    None,
    /// One Ogg page header and segment table was consumed.
    ParseOggDone,
    /// The current frame could not be fully parsed from the bytes given; supply more input,
    /// covering the same unconsumed bytes plus additional data, and call again.
    DecodeFramesLoop,
    /// Some, but not all, of the decoded block's samples were written to `output`; call again
    /// with fresh output space to receive the remainder.
    GiveNextLoop,
    /// An Ogg capture pattern was found where a frame sync was expected; the driver has reset
    /// itself and resumed page tracking.
    OggSyncFound,
    /// The stream cannot be decoded further.
    Stop,
    /// A decode error occurred; see the log for details.
    Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    /// Waiting for (and attempting) a full frame header plus all of its subframes.
    DecodeFrame,
    /// A frame has been fully decoded into `sample_buf`; draining it to the caller's output,
    /// possibly across several calls.
    OutSamples,
}

/// A stateful, single-stream FLAC and Ogg-FLAC decoder driver.
///
/// `decode` is the only entry point that touches the bitstream; every other method only reads
/// or resets accumulated state. Working buffers are sized once a block size becomes known (via
/// STREAMINFO, a frame header, or [`FlacDriver::set_raw_block_params`]) and reused frame to
/// frame rather than reallocated.
pub struct FlacDriver {
    state: DriverState,

    is_ogg_wrapper: bool,
    first_call: bool,

    // Ogg-specific state. `parse_ogg_next` mirrors the reference's "need a fresh page header"
    // flag; `page_nr` tracks the FLAC-in-Ogg packet sequence (0 = identification packet,
    // 1 = metadata packets, 2 = audio packets).
    parse_ogg_next: bool,
    page_nr: u8,
    segment_table: VecDeque<u16>,
    /// Bytes of an over-long non-audio Ogg segment still to be skipped across calls.
    skip_remaining: usize,
    /// Bytes of the current Ogg audio segment not yet handed to the native frame decoder.
    segment_remaining: usize,

    current_file_pos: u64,
    audio_data_start: u64,
    /// Length in bytes of the audio data region, when supplied out-of-band via
    /// [`Self::set_raw_block_params`] (0 if never supplied).
    audio_data_len: u64,

    channels: u32,
    sample_rate: u32,
    bits_per_sample: u32,
    total_samples: u64,

    sample_buf: Vec<Vec<i32>>,
    max_block_size: usize,
    current_channel_assignment: Option<ChannelAssignment>,

    block_num_samples: u32,
    /// Index of the next sample not yet written to the caller's output buffer, within the
    /// current decoded block; nonzero between calls only while a block's output is still being
    /// drained across multiple `decode` calls.
    offset: u32,
    valid_samples: u32,

    bits_since_last_output: u64,
    bitrate: u32,
    compression_ratio: f32,

    metadata_parser: MetadataParser,
    stream_title: Option<String>,
    new_stream_title: bool,
    block_picture_items: Vec<PictureSpan>,
    new_block_picture: bool,
    /// A picture span whose bytes continue onto a later Ogg page: (absolute offset of the next
    /// unseen byte, bytes still to attribute).
    pending_picture: Option<(u64, i64)>,
}

impl Default for FlacDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FlacDriver {
    pub fn new() -> Self {
        FlacDriver {
            state: DriverState::DecodeFrame,
            is_ogg_wrapper: false,
            first_call: true,
            parse_ogg_next: false,
            page_nr: 0,
            segment_table: VecDeque::new(),
            skip_remaining: 0,
            segment_remaining: 0,
            current_file_pos: 0,
            audio_data_start: 0,
            audio_data_len: 0,
            channels: 0,
            sample_rate: 0,
            bits_per_sample: 0,
            total_samples: 0,
            sample_buf: Vec::new(),
            max_block_size: 0,
            current_channel_assignment: None,
            block_num_samples: 0,
            offset: 0,
            valid_samples: 0,
            bits_since_last_output: 0,
            bitrate: 0,
            compression_ratio: 0.0,
            metadata_parser: MetadataParser::new(),
            stream_title: None,
            new_stream_title: false,
            block_picture_items: Vec::new(),
            new_block_picture: false,
            pending_picture: None,
        }
    }

    /// Clears decode state (frame/subframe progress, accumulated metadata) without forgetting
    /// the stream parameters already learned via STREAMINFO or [`Self::set_raw_block_params`].
    pub fn clear(&mut self) {
        self.state = DriverState::DecodeFrame;
        self.offset = 0;
        self.segment_table.clear();
        for buf in &mut self.sample_buf {
            buf.clear();
        }
    }

    /// Resets the driver to its just-constructed state, including stream parameters. Use this
    /// when resynchronizing after an unrecoverable stream error.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Supplies stream parameters out-of-band, for callers that already know them (e.g. from a
    /// container-level header) instead of waiting for this decoder to see a STREAMINFO block.
    pub fn set_raw_block_params(
        &mut self,
        channels: u32,
        sample_rate: u32,
        bits_per_sample: u32,
        total_samples: u64,
        audio_data_len: u64,
    ) {
        debug!(
            "raw block params: channels={}, sample_rate={}, bits_per_sample={}, total_samples={}, \
             audio_data_len={}",
            channels, sample_rate, bits_per_sample, total_samples, audio_data_len
        );
        self.channels = channels;
        self.sample_rate = sample_rate;
        self.bits_per_sample = bits_per_sample;
        self.total_samples = total_samples;
        self.audio_data_len = audio_data_len;
        self.ensure_block_capacity(MAX_BLOCK_SIZE, channels.max(1) as usize);
    }

    /// Allocates per-channel sample buffers sized to [`MAX_BLOCK_SIZE`] ahead of the first
    /// `decode` call, so the first frame decoded does not pay for buffer growth. Always succeeds
    /// in practice (allocation failure aborts the process in safe Rust rather than producing a
    /// catchable error), but keeps the fallible signature the caller-facing contract expects.
    pub fn init(&mut self) -> bool {
        self.ensure_block_capacity(MAX_BLOCK_SIZE, self.channels.max(1) as usize);
        true
    }

    fn ensure_block_capacity(&mut self, n_samples: usize, n_channels: usize) {
        if self.sample_buf.len() < n_channels {
            self.sample_buf.resize_with(n_channels, Vec::new);
        }
        if n_samples > self.max_block_size {
            self.max_block_size = n_samples;
        }
        for buf in &mut self.sample_buf {
            if buf.len() < self.max_block_size {
                buf.resize(self.max_block_size, 0);
            }
        }
    }

    /// Scans `buf` for either an Ogg capture pattern or a byte-aligned 14-bit FLAC frame sync,
    /// returning the byte offset of the first candidate found, or `None` if neither appears. A
    /// non-zero offset found while already decoding native frames implies stream corruption was
    /// skipped over, so the driver resets itself; the caller should resume feeding input
    /// starting at the returned offset.
    pub fn find_sync_word(&mut self, buf: &[u8]) -> Option<usize> {
        if let Some(pos) = buf.windows(4).position(|w| w == b"OggS") {
            return Some(pos);
        }

        if self.is_ogg_wrapper {
            return None;
        }

        match frame::sync_frame(buf) {
            Some(0) => Some(0),
            Some(offset) => {
                self.reset();
                Some(offset)
            }
            None => None,
        }
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn compression_ratio(&self) -> f32 {
        self.compression_ratio
    }

    pub fn audio_data_start(&self) -> u64 {
        self.audio_data_start
    }

    pub fn audio_data_len(&self) -> u64 {
        self.audio_data_len
    }

    pub fn audio_file_duration(&self) -> u64 {
        if self.sample_rate == 0 {
            0
        } else {
            self.total_samples / u64::from(self.sample_rate)
        }
    }

    /// Number of valid interleaved samples written by the most recent `decode` call that
    /// produced output. Reading this value consumes it (resets to 0), matching the single-shot
    /// accessors below.
    pub fn take_output_samples(&mut self) -> u32 {
        std::mem::replace(&mut self.valid_samples, 0)
    }

    /// Returns and clears a freshly-parsed stream title ("Artist - Title"), if one became
    /// available since the last call.
    pub fn take_stream_title(&mut self) -> Option<String> {
        if self.new_stream_title {
            self.new_stream_title = false;
            self.stream_title.take()
        } else {
            None
        }
    }

    /// Returns and clears the accumulated byte-range descriptors for an embedded picture, if one
    /// completed since the last call.
    pub fn take_metadata_block_picture(&mut self) -> Vec<PictureSpan> {
        if self.new_block_picture {
            self.new_block_picture = false;
            std::mem::take(&mut self.block_picture_items)
        } else {
            Vec::new()
        }
    }

    /// Decodes as much as it can from `input`, writing interleaved samples to `output` and
    /// updating `bytes_left` to reflect how many bytes of `input` remain unconsumed.
    pub fn decode(&mut self, input: &[u8], bytes_left: &mut usize, output: &mut [i32]) -> Status {
        if self.first_call {
            self.first_call = false;
            self.is_ogg_wrapper = input.starts_with(b"OggS");
        }

        if self.is_ogg_wrapper {
            self.decode_ogg(input, bytes_left, output)
        } else {
            self.decode_native(&input[..input.len().min(*bytes_left)], bytes_left, output)
        }
    }

    fn decode_ogg(&mut self, input: &[u8], bytes_left: &mut usize, output: &mut [i32]) -> Status {
        if self.skip_remaining > 0 {
            let skip = self.skip_remaining.min(*bytes_left).min(input.len());
            self.current_file_pos += skip as u64;
            *bytes_left -= skip;
            self.skip_remaining -= skip;
            return Status::ParseOggDone;
        }

        if self.segment_remaining > 0 {
            let take = self.segment_remaining.min(input.len()).min(*bytes_left);
            let mut sub_left = take;
            let status = self.decode_native(&input[..take], &mut sub_left, output);
            let consumed = take - sub_left;
            self.segment_remaining -= consumed;
            self.current_file_pos += consumed as u64;
            *bytes_left -= consumed;
            return status;
        }

        if self.parse_ogg_next {
            let header = match ogg::read_page_header(input) {
                Ok(h) => h,
                Err(_) => {
                    warn!("ogg: failed to parse page header");
                    return Status::Err;
                }
            };

            self.parse_ogg_next = false;

            if header.is_first_page {
                self.page_nr = 0;
            }

            self.segment_table = match ogg::read_segment_table(input, &header) {
                Ok(t) => t,
                Err(e) => {
                    warn!("ogg: failed to parse segment table: {}", e);
                    return Status::Err;
                }
            };

            let header_len = ogg::page_header_len(&header);
            *bytes_left = bytes_left.saturating_sub(header_len);
            self.current_file_pos += header_len as u64;

            trace!(
                "ogg page: serial={}, sequence={}, n_segments={}",
                header.serial,
                header.sequence,
                header.n_segments
            );

            return Status::ParseOggDone;
        }

        let Some(segment_len) = self.segment_table.pop_front() else {
            self.parse_ogg_next = true;
            return Status::ParseOggDone;
        };
        let segment_len = usize::from(segment_len);

        if self.segment_table.is_empty() {
            self.parse_ogg_next = true;
        }

        if self.page_nr == 2 && self.pending_picture.is_none() {
            // Audio segment: hand its byte budget to the native decoder starting next call,
            // without consuming it from `bytes_left` here.
            self.segment_remaining = segment_len;
            return Status::ParseOggDone;
        }

        if segment_len > input.len() {
            warn!("ogg: segment longer than the bytes supplied");
            return Status::Err;
        }
        let segment = &input[..segment_len];

        let status = if self.page_nr == 0 {
            match parse_first_packet(segment) {
                Ok(()) => {
                    self.page_nr = 1;
                    Status::ParseOggDone
                }
                Err(()) => {
                    warn!("ogg: first packet is not a FLAC identification packet");
                    Status::Err
                }
            }
        } else if let Some((_, remaining)) = self.pending_picture {
            let take = remaining.min(segment_len as i64);
            self.block_picture_items.push(PictureSpan { offset: self.current_file_pos, len: take as u64 });
            let remaining = remaining - take;
            self.pending_picture = if remaining > 0 {
                Some((self.current_file_pos + take as u64, remaining))
            } else {
                None
            };
            if self.pending_picture.is_none() {
                // Continuation just delivered the last byte of the picture's span: surface it
                // immediately rather than waiting for a page that may never arrive.
                self.page_nr = 2;
                self.new_block_picture = true;
            }
            Status::ParseOggDone
        } else {
            match self.metadata_parser.parse_block(segment, self.current_file_pos) {
                Ok(MetadataBlock::StreamInfo(si)) => {
                    self.channels = si.channels;
                    self.sample_rate = si.sample_rate;
                    self.bits_per_sample = si.bits_per_sample;
                    self.total_samples = si.total_samples;
                    self.ensure_block_capacity(si.max_block_size as usize, si.channels as usize);
                    Status::ParseOggDone
                }
                Ok(MetadataBlock::VorbisComment(tags)) => {
                    self.apply_vorbis_tags(tags);
                    Status::ParseOggDone
                }
                Ok(MetadataBlock::Ignored) => Status::ParseOggDone,
                Err(e) => {
                    warn!("flac: failed to parse metadata block: {}", e);
                    Status::Err
                }
            }
        };

        if status == Status::Err {
            return status;
        }

        if self.page_nr == 1 && self.metadata_parser.is_last_block {
            self.page_nr = 2;
        }

        if segment_len > self.max_block_size.max(MAX_BLOCK_SIZE) {
            self.skip_remaining = segment_len;
            return Status::ParseOggDone;
        }

        *bytes_left = bytes_left.saturating_sub(segment_len);
        self.current_file_pos += segment_len as u64;
        status
    }

    fn apply_vorbis_tags(&mut self, tags: VorbisTags) {
        if let Some(span) = tags.block_picture {
            let present = tags.block_picture_bytes_present.min(span.len);
            let remaining = span.len - present;

            self.block_picture_items.clear();
            self.block_picture_items.push(PictureSpan { offset: span.offset, len: present });

            if remaining > 0 {
                self.pending_picture = Some((span.offset + present, remaining as i64));
            } else {
                self.new_block_picture = true;
            }
        }

        if let Some(title) = tags.stream_title() {
            self.stream_title = Some(title);
            self.new_stream_title = true;
        }
    }

    fn decode_native(&mut self, data: &[u8], bytes_left: &mut usize, output: &mut [i32]) -> Status {
        if self.state == DriverState::DecodeFrame {
            if data.starts_with(b"OggS") {
                self.reset();
                self.is_ogg_wrapper = true;
                self.page_nr = 2;
                return Status::OggSyncFound;
            }

            let mut bs = BitReaderLtr::new(data);

            let header = match frame::read_frame_header(&mut bs) {
                Ok(h) => h,
                Err(e) => {
                    warn!("flac: failed to parse frame header: {}", e);
                    return Status::Err;
                }
            };

            if self.apply_frame_header(&header).is_err() {
                return Status::Err;
            }

            let subframes_result = self.decode_subframes(&mut bs);

            if bs.underflowed() {
                // Not enough data was present to be confident the frame decoded correctly; ask
                // for more without committing any of it.
                return Status::DecodeFramesLoop;
            }

            if subframes_result.is_err() {
                return Status::Err;
            }

            let consumed = bs.bytes_consumed();
            *bytes_left = bytes_left.saturating_sub(consumed);
            self.current_file_pos += consumed as u64;
            self.bits_since_last_output += (consumed as u64) * 8;

            self.state = DriverState::OutSamples;
            self.offset = 0;
        }

        self.drain_output(output)
    }

    fn drain_output(&mut self, output: &mut [i32]) -> Status {
        let n_channels = self.channels.max(1) as usize;
        let out_capacity = output.len() / n_channels;
        let remaining_in_block = self.block_num_samples - self.offset;
        let block_size = out_capacity.min(remaining_in_block as usize) as u32;

        for i in 0..block_size as usize {
            for ch in 0..n_channels {
                let mut val = self.sample_buf[ch][i + self.offset as usize];
                if self.bits_per_sample == 8 {
                    val += 128;
                }
                output[n_channels * i + ch] = val;
            }
        }

        self.valid_samples = block_size * self.channels;
        self.offset += block_size;

        if self.bits_since_last_output > 0 && self.valid_samples > 0 {
            let valid_bits = u64::from(self.valid_samples) * u64::from(self.bits_per_sample);
            self.compression_ratio = self.bits_since_last_output as f32 / valid_bits as f32;
            self.bits_since_last_output = 0;
            if self.compression_ratio > 0.0 {
                self.bitrate = (self.sample_rate as f32 * self.bits_per_sample as f32 * self.channels as f32
                    / self.compression_ratio) as u32;
            }
        }

        if self.offset != self.block_num_samples {
            return Status::GiveNextLoop;
        }

        self.offset = 0;
        self.state = DriverState::DecodeFrame;
        Status::None
    }

    fn apply_frame_header(&mut self, header: &FrameHeader) -> Result<(), ()> {
        let header_channels = header.channel_assignment.num_channels();
        if self.channels == 0 {
            self.channels = header_channels;
        }
        if header_channels != self.channels {
            warn!(
                "flac: frame channel count {} does not match stream channel count {}",
                header_channels, self.channels
            );
            return Err(());
        }

        if let Some(bps) = header.bits_per_sample {
            if self.bits_per_sample == 0 {
                self.bits_per_sample = bps;
            }
        }
        if self.bits_per_sample == 0 {
            warn!("flac: bits per sample is unknown and not present in the frame header");
            return Err(());
        }

        if let Some(rate) = header.sample_rate {
            if self.sample_rate == 0 {
                self.sample_rate = rate;
            }
        }

        if self.audio_data_start == 0 {
            self.audio_data_start = self.current_file_pos;
        }

        self.block_num_samples = header.block_num_samples;
        self.ensure_block_capacity(header.block_num_samples as usize, header_channels as usize);
        self.current_channel_assignment = Some(header.channel_assignment);
        Ok(())
    }

    fn decode_subframes(&mut self, bs: &mut BitReaderLtr<'_>) -> Result<(), ()> {
        let n = self.block_num_samples as usize;
        let assignment = self.current_channel_assignment.take().ok_or(())?;
        let bps = self.bits_per_sample;

        match assignment {
            ChannelAssignment::Independent(channels) => {
                for ch in 0..channels as usize {
                    subframe::read_subframe(bs, bps, &mut self.sample_buf[ch][..n]).map_err(log_subframe_err)?;
                }
            }
            ChannelAssignment::LeftSide => {
                let (left, rest) = self.sample_buf.split_at_mut(1);
                subframe::read_subframe(bs, bps, &mut left[0][..n]).map_err(log_subframe_err)?;
                subframe::read_subframe(bs, bps + 1, &mut rest[0][..n]).map_err(log_subframe_err)?;
                subframe::decorrelate_left_side(&left[0][..n], &mut rest[0][..n]);
            }
            ChannelAssignment::RightSide => {
                let (side, rest) = self.sample_buf.split_at_mut(1);
                subframe::read_subframe(bs, bps + 1, &mut side[0][..n]).map_err(log_subframe_err)?;
                subframe::read_subframe(bs, bps, &mut rest[0][..n]).map_err(log_subframe_err)?;
                subframe::decorrelate_right_side(&rest[0][..n], &mut side[0][..n]);
            }
            ChannelAssignment::MidSide => {
                let (mid, rest) = self.sample_buf.split_at_mut(1);
                subframe::read_subframe(bs, bps, &mut mid[0][..n]).map_err(log_subframe_err)?;
                subframe::read_subframe(bs, bps + 1, &mut rest[0][..n]).map_err(log_subframe_err)?;
                subframe::decorrelate_mid_side(&mut mid[0][..n], &mut rest[0][..n]);
            }
        }

        // The 16-bit frame footer (a CRC this decoder does not verify) follows immediately.
        bs.align_to_byte();
        bs.read_bits_leq32(16);

        Ok(())
    }
}

fn log_subframe_err(err: crate::error::Error) {
    warn!("flac: subframe decode failed: {}", err);
}

fn parse_first_packet(segment: &[u8]) -> Result<(), ()> {
    if segment.len() >= 4 && &segment[..4] == b"fLaC" {
        Ok(())
    } else {
        Err(())
    }
}
