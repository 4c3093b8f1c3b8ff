//! End-to-end tests that build small synthetic FLAC and Ogg-FLAC byte streams and decode them
//! with `FlacDriver`, in the style of `symphonia-check`'s whole-stream verification rather than
//! unit-level round-trip grids.

use flac_stream::{FlacDriver, Status};

/// A scratch MSB-first bit writer for assembling frame headers and subframes by hand.
struct BitWriter {
    bits: Vec<bool>,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter { bits: Vec::new() }
    }

    fn push(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 != 0);
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for chunk in self.bits.chunks(8) {
            let mut byte = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                if bit {
                    byte |= 1 << (7 - i);
                }
            }
            bytes.push(byte);
        }
        bytes
    }
}

fn push_signed(bw: &mut BitWriter, value: i32, n: u32) {
    let mask = if n >= 32 { u32::MAX } else { (1u32 << n) - 1 };
    bw.push((value as u32) & mask, n);
}

/// Frame header bits common to every synthetic frame in this file: fixed blocking strategy,
/// explicit 16-bit block size, 44100 Hz taken from STREAMINFO, frame number 0.
fn push_frame_header(bw: &mut BitWriter, channels_enc: u32, bps_enc: u32, block_size: u16) {
    bw.push(0b1111_1111_1111_10, 14); // sync
    bw.push(0, 1); // mandatory reserved bit
    bw.push(0, 1); // fixed blocking strategy
    bw.push(0x7, 4); // block size: explicit 16-bit field follows
    bw.push(0x0, 4); // sample rate: get from streaminfo
    bw.push(channels_enc, 4);
    bw.push(bps_enc, 3);
    bw.push(0, 1); // mandatory reserved bit
    bw.push(0, 8); // frame number (UTF-8, single byte for 0)
    bw.push((block_size - 1) as u32, 16);
    bw.push(0, 8); // CRC8, unverified
}

/// A CONSTANT subframe: 1 zero padding bit, type 0b000000, no wasted bits, one signed sample.
fn push_constant_subframe(bw: &mut BitWriter, bps: u32, value: i32) {
    bw.push(0, 1);
    bw.push(0b000000, 6);
    bw.push(0, 1); // no wasted bits
    push_signed(bw, value, bps);
}

/// A VERBATIM subframe: 1 zero padding bit, type 0b000001, no wasted bits, one signed sample
/// per entry in `values`.
fn push_verbatim_subframe(bw: &mut BitWriter, bps: u32, values: &[i32]) {
    bw.push(0, 1);
    bw.push(0b000001, 6);
    bw.push(0, 1);
    for &v in values {
        push_signed(bw, v, bps);
    }
}

/// A FIXED order-2 subframe whose residual is all zero (single partition, Rice parameter 0),
/// so the decoded samples are exactly the linear recurrence the fixed predictor reproduces from
/// the two warm-up samples.
fn push_fixed_order2_zero_residual_subframe(bw: &mut BitWriter, bps: u32, warm: [i32; 2], n_residual: usize) {
    bw.push(0, 1);
    bw.push(0b001010, 6); // FIXED, order 2
    bw.push(0, 1); // no wasted bits
    push_signed(bw, warm[0], bps);
    push_signed(bw, warm[1], bps);
    bw.push(0b00, 2); // residual coding method: 4-bit rice parameters, no escape
    bw.push(0b0000, 4); // partition order 0 (one partition)
    bw.push(0b0000, 4); // rice parameter k=0
    for _ in 0..n_residual {
        bw.push(1, 1); // unary-coded zero quotient, zero remainder bits at k=0
    }
}

fn push_frame_footer(bw: &mut BitWriter) {
    // Byte-align, then the 16-bit frame CRC (unverified by this decoder).
    while bw.bits.len() % 8 != 0 {
        bw.bits.push(false);
    }
    bw.push(0, 16);
}

#[test]
fn decodes_monaural_constant_frame() {
    let mut driver = FlacDriver::new();
    driver.set_raw_block_params(1, 44_100, 16, 4, 0);

    let mut bw = BitWriter::new();
    push_frame_header(&mut bw, 0x0, 0x4, 4); // mono, 16 bps, block size 4
    push_constant_subframe(&mut bw, 16, 0);
    push_frame_footer(&mut bw);
    let frame = bw.into_bytes();

    let mut bytes_left = frame.len();
    let mut output = [0i32; 4];
    let status = driver.decode(&frame, &mut bytes_left, &mut output);

    assert_eq!(status, Status::None);
    assert_eq!(bytes_left, 0);
    assert_eq!(driver.take_output_samples(), 4);
    assert_eq!(output, [0, 0, 0, 0]);
}

#[test]
fn decodes_stereo_left_side_verbatim_frame() {
    let mut driver = FlacDriver::new();
    driver.set_raw_block_params(2, 44_100, 16, 2, 0);

    let left = [100i32, -50];
    let right = [40i32, -10];
    let side: Vec<i32> = left.iter().zip(&right).map(|(l, r)| l - r).collect();

    let mut bw = BitWriter::new();
    push_frame_header(&mut bw, 0x8, 0x4, 2); // left/side, 16 bps, block size 2
    push_verbatim_subframe(&mut bw, 16, &left);
    push_verbatim_subframe(&mut bw, 17, &side); // side channel gets +1 bit per spec
    push_frame_footer(&mut bw);
    let frame = bw.into_bytes();

    let mut bytes_left = frame.len();
    let mut output = [0i32; 4]; // 2 samples * 2 channels
    let status = driver.decode(&frame, &mut bytes_left, &mut output);

    assert_eq!(status, Status::None);
    assert_eq!(bytes_left, 0);
    assert_eq!(output, [left[0], right[0], left[1], right[1]]);
}

#[test]
fn decodes_mid_side_frame_matching_non_rounding_formula() {
    let mut driver = FlacDriver::new();
    driver.set_raw_block_params(2, 44_100, 16, 1, 0);

    let left = 100i32;
    let right = 40i32;
    let mid = (left + right) >> 1;
    let side = left - right;

    let mut bw = BitWriter::new();
    push_frame_header(&mut bw, 0xa, 0x4, 1); // mid/side, 16 bps, block size 1
    push_verbatim_subframe(&mut bw, 16, &[mid]);
    push_verbatim_subframe(&mut bw, 17, &[side]);
    push_frame_footer(&mut bw);
    let frame = bw.into_bytes();

    let mut bytes_left = frame.len();
    let mut output = [0i32; 2];
    let status = driver.decode(&frame, &mut bytes_left, &mut output);

    assert_eq!(status, Status::None);
    assert_eq!(output, [left, right]);
}

#[test]
fn give_next_loop_drains_a_block_across_multiple_calls() {
    let mut driver = FlacDriver::new();
    driver.set_raw_block_params(1, 44_100, 16, 4, 0);

    let mut bw = BitWriter::new();
    push_frame_header(&mut bw, 0x0, 0x4, 4);
    push_verbatim_subframe(&mut bw, 16, &[1, 2, 3, 4]);
    push_frame_footer(&mut bw);
    let frame = bw.into_bytes();

    let mut bytes_left = frame.len();

    let mut first_half = [0i32; 2];
    let status = driver.decode(&frame, &mut bytes_left, &mut first_half);
    assert_eq!(status, Status::GiveNextLoop);
    assert_eq!(driver.take_output_samples(), 2);
    assert_eq!(first_half, [1, 2]);

    let mut second_half = [0i32; 2];
    let status = driver.decode(&[], &mut 0, &mut second_half);
    assert_eq!(status, Status::None);
    assert_eq!(driver.take_output_samples(), 2);
    assert_eq!(second_half, [3, 4]);
}

#[test]
fn decodes_fixed_order_2_linear_ramp_from_zero_residual() {
    let mut driver = FlacDriver::new();
    driver.set_raw_block_params(1, 44_100, 16, 4, 0);

    let mut bw = BitWriter::new();
    push_frame_header(&mut bw, 0x0, 0x4, 4); // mono, 16 bps, block size 4
    push_fixed_order2_zero_residual_subframe(&mut bw, 16, [0, 1], 2);
    push_frame_footer(&mut bw);
    let frame = bw.into_bytes();

    let mut bytes_left = frame.len();
    let mut output = [0i32; 4];
    let status = driver.decode(&frame, &mut bytes_left, &mut output);

    assert_eq!(status, Status::None);
    assert_eq!(bytes_left, 0);
    assert_eq!(output, [0, 1, 2, 3]);
}

fn ogg_page(sequence: u32, is_first: bool, is_last: bool, segment_lens: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"OggS");
    buf.push(0); // version
    let mut flags = 0u8;
    if is_first {
        flags |= 0x02;
    }
    if is_last {
        flags |= 0x04;
    }
    buf.push(flags);
    buf.extend_from_slice(&0u64.to_le_bytes()); // absolute granule position
    buf.extend_from_slice(&1u32.to_le_bytes()); // serial
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // crc, unverified by this decoder
    buf.push(segment_lens.len() as u8);
    buf.extend_from_slice(segment_lens);
    buf.extend_from_slice(payload);
    buf
}

/// Ogg lacing values for a single packet of `len` bytes: runs of 255 followed by the remainder.
fn lace_255(mut len: usize) -> Vec<u8> {
    let mut segs = Vec::new();
    while len >= 255 {
        segs.push(255u8);
        len -= 255;
    }
    segs.push(len as u8);
    segs
}

fn build_streaminfo_body(sample_rate: u32, channels: u32, bits_per_sample: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 34];
    buf[0..2].copy_from_slice(&4096u16.to_be_bytes());
    buf[2..4].copy_from_slice(&4096u16.to_be_bytes());
    let packed: u64 = (u64::from(sample_rate) << (64 - 20))
        | (u64::from(channels - 1) << (64 - 20 - 3))
        | (u64::from(bits_per_sample - 1) << (64 - 20 - 3 - 5));
    buf[10..18].copy_from_slice(&packed.to_be_bytes());
    buf
}

#[test]
fn oversized_picture_tag_accumulates_across_ogg_pages() {
    let tag_name = b"METADATA_BLOCK_PICTURE";
    let present_payload_len = 20usize;
    let declared_value_len = 1000usize;
    let declared_comment_len = tag_name.len() + 1 + declared_value_len;

    let mut vc_body = Vec::new();
    vc_body.extend_from_slice(&0u32.to_le_bytes()); // vendor length 0
    vc_body.extend_from_slice(&1u32.to_le_bytes()); // one comment
    vc_body.extend_from_slice(&(declared_comment_len as u32).to_le_bytes());
    vc_body.extend_from_slice(tag_name);
    vc_body.push(b'=');
    vc_body.extend_from_slice(&vec![0xABu8; present_payload_len]);

    // The block header declares a length far beyond what this packet holds, so the rest of the
    // picture value arrives as raw continuation bytes in a later page.
    let declared_block_length = (vc_body.len() + 980) as u32;
    let mut vc_packet = vec![0x84u8]; // last metadata block, type 4 (VORBIS_COMMENT)
    vc_packet.push((declared_block_length >> 16) as u8);
    vc_packet.push((declared_block_length >> 8) as u8);
    vc_packet.push(declared_block_length as u8);
    vc_packet.extend_from_slice(&vc_body);

    let si_body = build_streaminfo_body(44_100, 1, 16);
    let mut si_packet = vec![0x00u8, 0x00, 0x00, si_body.len() as u8];
    si_packet.extend_from_slice(&si_body);

    let id_packet = b"fLaC".to_vec();

    let page1_payload = [id_packet.clone(), si_packet.clone(), vc_packet.clone()].concat();
    let page1 = ogg_page(
        0,
        true,
        false,
        &[id_packet.len() as u8, si_packet.len() as u8, vc_packet.len() as u8],
        &page1_payload,
    );

    let present_span_bytes = 1 + present_payload_len; // '=' plus the bytes present in page 1
    let continuation_len = declared_comment_len - tag_name.len() - present_span_bytes;
    let continuation_payload = vec![0xCDu8; continuation_len];
    let page2 = ogg_page(1, false, true, &lace_255(continuation_len), &continuation_payload);

    let mut stream = page1;
    stream.extend_from_slice(&page2);

    let mut driver = FlacDriver::new();
    let mut bytes_left = stream.len();
    let mut output: [i32; 0] = [];

    let mut guard = 0;
    while bytes_left > 0 && guard < 10_000 {
        let offset = stream.len() - bytes_left;
        let status = driver.decode(&stream[offset..], &mut bytes_left, &mut output);
        assert_ne!(status, Status::Err);
        guard += 1;
    }

    let spans = driver.take_metadata_block_picture();
    let total: u64 = spans.iter().map(|s| s.len).sum();
    assert_eq!(total, (present_span_bytes + continuation_len) as u64);
    assert!(spans.len() >= 2, "picture should have arrived as at least two spans");
}
