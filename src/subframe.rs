// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subframe and residual decoding: CONSTANT, VERBATIM, FIXED, and LPC subframes, and the
//! partitioned-Rice residual coder shared by FIXED and LPC.

use std::cmp;
use std::num::Wrapping;

use crate::bitreader::BitReaderLtr;
use crate::error::{decode_error, unsupported_error, Result};

#[derive(Debug)]
enum SubframeType {
    Constant,
    Verbatim,
    FixedLinear(u32),
    Linear(u32),
}

/// Decodes one subframe's samples into `buf`, which must already hold exactly
/// `block_num_samples` slots. `frame_bps` is the bits-per-sample stated for this channel by the
/// frame header (already widened by one bit for a Left/Side, Mid/Side, or Right/Side "side"
/// channel by the caller).
pub fn read_subframe(bs: &mut BitReaderLtr<'_>, frame_bps: u32, buf: &mut [i32]) -> Result<()> {
    if bs.read_bool() {
        return decode_error("flac: subframe padding is not 0");
    }

    let subframe_type_enc = bs.read_bits_leq32(6);

    let subframe_type = match subframe_type_enc {
        0x00 => SubframeType::Constant,
        0x01 => SubframeType::Verbatim,
        0x08..=0x0f => {
            let order = subframe_type_enc & 0x07;
            if order > 4 {
                return decode_error("flac: fixed predictor orders greater than 4 are invalid");
            }
            SubframeType::FixedLinear(order)
        }
        0x20..=0x3f => SubframeType::Linear((subframe_type_enc & 0x1f) + 1),
        _ => return decode_error("flac: subframe type set to reserved value"),
    };

    // Bit 7 designates whether any low-order bits were dropped ("wasted") before encoding;
    // if set, the count (minus one) follows unary-coded.
    let dropped_bps = if bs.read_bool() { bs.read_unary_zeros() + 1 } else { 0 };

    if dropped_bps >= frame_bps {
        return decode_error("flac: wasted bits consume the entire sample depth");
    }

    let bps = frame_bps - dropped_bps;

    match subframe_type {
        SubframeType::Constant => decode_constant(bs, bps, buf),
        SubframeType::Verbatim => decode_verbatim(bs, bps, buf),
        SubframeType::FixedLinear(order) => decode_fixed_linear(bs, bps, order, buf)?,
        SubframeType::Linear(order) => decode_linear(bs, bps, order, buf)?,
    };

    samples_shl(dropped_bps, buf);

    Ok(())
}

#[inline(always)]
fn samples_shl(shift: u32, buf: &mut [i32]) {
    if shift > 0 {
        for sample in buf.iter_mut() {
            *sample = sample.wrapping_shl(shift);
        }
    }
}

fn decode_constant(bs: &mut BitReaderLtr<'_>, bps: u32, buf: &mut [i32]) {
    let value = bs.read_bits_leq32_signed(bps);
    for sample in buf.iter_mut() {
        *sample = value;
    }
}

fn decode_verbatim(bs: &mut BitReaderLtr<'_>, bps: u32, buf: &mut [i32]) {
    for sample in buf.iter_mut() {
        *sample = bs.read_bits_leq32_signed(bps);
    }
}

fn decode_fixed_linear(
    bs: &mut BitReaderLtr<'_>,
    bps: u32,
    order: u32,
    buf: &mut [i32],
) -> Result<()> {
    if order as usize > buf.len() {
        return decode_error("flac: fixed predictor order exceeds block size");
    }
    decode_verbatim(bs, bps, &mut buf[..order as usize]);
    decode_residual(bs, order, buf)?;
    fixed_predict(order, buf);
    Ok(())
}

fn decode_linear(bs: &mut BitReaderLtr<'_>, bps: u32, order: u32, buf: &mut [i32]) -> Result<()> {
    debug_assert!(order > 0 && order <= 32);

    if order as usize > buf.len() {
        return decode_error("flac: lpc order exceeds block size");
    }
    decode_verbatim(bs, bps, &mut buf[..order as usize]);

    let qlp_precision = bs.read_bits_leq32(4) + 1;
    if qlp_precision > 15 {
        return decode_error("flac: qlp precision set to reserved value");
    }

    let qlp_coeff_shift = bs.read_bits_leq32_signed(5);

    if qlp_coeff_shift < 0 {
        return unsupported_error("flac: negative lpc shifts are not supported");
    }

    let shift = qlp_coeff_shift as u32;

    if order <= 4 {
        let mut coeffs = [0i32; 4];
        for c in coeffs[4 - order as usize..4].iter_mut().rev() {
            *c = bs.read_bits_leq32_signed(qlp_precision);
        }
        decode_residual(bs, order, buf)?;
        lpc_predict_4(order as usize, &coeffs, shift, buf);
    } else if order <= 8 {
        let mut coeffs = [0i32; 8];
        for c in coeffs[8 - order as usize..8].iter_mut().rev() {
            *c = bs.read_bits_leq32_signed(qlp_precision);
        }
        decode_residual(bs, order, buf)?;
        lpc_predict_8(order as usize, &coeffs, shift, buf);
    } else if order <= 12 {
        let mut coeffs = [0i32; 12];
        for c in coeffs[12 - order as usize..12].iter_mut().rev() {
            *c = bs.read_bits_leq32_signed(qlp_precision);
        }
        decode_residual(bs, order, buf)?;
        lpc_predict_12(order as usize, &coeffs, shift, buf);
    } else {
        let mut coeffs = [0i32; 32];
        for c in coeffs[32 - order as usize..32].iter_mut().rev() {
            *c = bs.read_bits_leq32_signed(qlp_precision);
        }
        decode_residual(bs, order, buf)?;
        lpc_predict_32(order as usize, &coeffs, shift, buf);
    }

    Ok(())
}

fn decode_residual(bs: &mut BitReaderLtr<'_>, n_prelude_samples: u32, buf: &mut [i32]) -> Result<()> {
    let method_enc = bs.read_bits_leq32(2);

    let param_bit_width = match method_enc {
        0x0 => 4,
        0x1 => 5,
        _ => return decode_error("flac: residual method set to reserved value"),
    };

    let order = bs.read_bits_leq32(4);
    let n_partitions = 1usize << order;

    if n_partitions == 0 || buf.len() % n_partitions != 0 {
        return decode_error("flac: block size is not same as encoded residual");
    }

    let n_partition_samples = buf.len() / n_partitions;

    if n_prelude_samples as usize > n_partition_samples {
        return decode_error("flac: residual partition too small for given predictor order");
    }

    decode_rice_partition(
        bs,
        param_bit_width,
        &mut buf[n_prelude_samples as usize..n_partition_samples],
    )?;

    for chunk in buf[n_partition_samples..].chunks_mut(n_partition_samples) {
        decode_rice_partition(bs, param_bit_width, chunk)?;
    }

    Ok(())
}

fn decode_rice_partition(bs: &mut BitReaderLtr<'_>, param_bit_width: u32, buf: &mut [i32]) -> Result<()> {
    let rice_param = bs.read_bits_leq32(param_bit_width);

    if rice_param < (1 << param_bit_width) - 1 {
        for sample in buf.iter_mut() {
            let q = bs.read_unary_zeros();
            let r = bs.read_bits_leq32(rice_param);
            *sample = rice_signed_to_i32((q << rice_param) | r);

            if bs.underflowed() {
                return decode_error("flac: bitstream exhausted while decoding residual");
            }
        }
    } else {
        let residual_bits = bs.read_bits_leq32(5);

        for sample in buf.iter_mut() {
            *sample = bs.read_bits_leq32_signed(residual_bits);

            if bs.underflowed() {
                return decode_error("flac: bitstream exhausted while decoding residual");
            }
        }
    }

    Ok(())
}

#[inline(always)]
fn rice_signed_to_i32(word: u32) -> i32 {
    let div2 = (word >> 1) as i32;
    let sign = -((word & 0x1) as i32);
    div2 ^ sign
}

fn fixed_predict(order: u32, buf: &mut [i32]) {
    debug_assert!(order <= 4);

    match order {
        0 => (),
        1 => {
            for i in 1..buf.len() {
                buf[i] += buf[i - 1];
            }
        }
        2 => {
            for i in 2..buf.len() {
                let a = Wrapping(-1) * Wrapping(i64::from(buf[i - 2]));
                let b = Wrapping(2) * Wrapping(i64::from(buf[i - 1]));
                buf[i] += (a + b).0 as i32;
            }
        }
        3 => {
            for i in 3..buf.len() {
                let a = Wrapping(1) * Wrapping(i64::from(buf[i - 3]));
                let b = Wrapping(-3) * Wrapping(i64::from(buf[i - 2]));
                let c = Wrapping(3) * Wrapping(i64::from(buf[i - 1]));
                buf[i] += (a + b + c).0 as i32;
            }
        }
        4 => {
            for i in 4..buf.len() {
                let a = Wrapping(-1) * Wrapping(i64::from(buf[i - 4]));
                let b = Wrapping(4) * Wrapping(i64::from(buf[i - 3]));
                let c = Wrapping(-6) * Wrapping(i64::from(buf[i - 2]));
                let d = Wrapping(4) * Wrapping(i64::from(buf[i - 1]));
                buf[i] += (a + b + c + d).0 as i32;
            }
        }
        _ => unreachable!(),
    }
}

/// Generalized LPC predictor macro for a fixed coefficient-array size. The exact number of
/// coefficients in use is `order`; coefficients are stored in reverse order in `coeffs`, with
/// the first real coefficient at the highest index. Indices below `$order - order` must be
/// zero. The first `order` samples in `buf` are assumed to already hold the warm-up samples.
macro_rules! lpc_predictor {
    ($func_name:ident, $order:expr) => {
        fn $func_name(order: usize, coeffs: &[i32; $order], coeff_shift: u32, buf: &mut [i32]) {
            debug_assert!(order <= coeffs.len());
            debug_assert!(order <= buf.len());

            let n_prefill = cmp::min($order, buf.len()) - order;

            for i in order..order + n_prefill {
                let predicted = coeffs[$order - order..$order]
                    .iter()
                    .zip(&buf[i - order..i])
                    .map(|(&c, &sample)| c as i64 * sample as i64)
                    .sum::<i64>();

                buf[i] += (predicted >> coeff_shift) as i32;
            }

            if buf.len() <= $order {
                return;
            }

            for i in $order..buf.len() {
                let s = &buf[i - $order..i];

                let mut predicted = 0i64;

                for j in 0..($order / 4) {
                    let a = coeffs[4 * j] as i64 * s[4 * j] as i64;
                    let b = coeffs[4 * j + 1] as i64 * s[4 * j + 1] as i64;
                    let c = coeffs[4 * j + 2] as i64 * s[4 * j + 2] as i64;
                    let d = coeffs[4 * j + 3] as i64 * s[4 * j + 3] as i64;
                    predicted += a + b + c + d;
                }

                buf[i] += (predicted >> coeff_shift) as i32;
            }
        }
    };
}

lpc_predictor!(lpc_predict_32, 32);
lpc_predictor!(lpc_predict_12, 12);
lpc_predictor!(lpc_predict_8, 8);
lpc_predictor!(lpc_predict_4, 4);

/// Reconstructs Left and the (discarded) Side channel from Left and Side, in place.
pub fn decorrelate_left_side(left: &[i32], side: &mut [i32]) {
    for (s, l) in side.iter_mut().zip(left) {
        *s = *l - *s;
    }
}

/// Reconstructs Right and the (discarded) Side channel from Side and Right, in place.
pub fn decorrelate_right_side(right: &[i32], side: &mut [i32]) {
    for (s, r) in side.iter_mut().zip(right) {
        *s += *r;
    }
}

/// Reconstructs Left and Right from Mid and Side, in place. `mid` holds Mid on entry and
/// becomes Left on return; `side` holds Side on entry and becomes Right on return.
///
/// This deliberately does not use the doubling trick (`(mid << 1) | (side & 1)`) that
/// preserves the low bit of precision for odd Side values; it reconstructs directly as
/// `right = mid - (side >> 1)` and `left = right + side`.
pub fn decorrelate_mid_side(mid: &mut [i32], side: &mut [i32]) {
    for (m, s) in mid.iter_mut().zip(side.iter_mut()) {
        let side_v = *s;
        let right = *m - (side_v >> 1);
        *s = right;
        *m = right + side_v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rice_signed_to_i32() {
        assert_eq!(rice_signed_to_i32(0), 0);
        assert_eq!(rice_signed_to_i32(1), -1);
        assert_eq!(rice_signed_to_i32(2), 1);
        assert_eq!(rice_signed_to_i32(3), -2);
        assert_eq!(rice_signed_to_i32(4), 2);
        assert_eq!(rice_signed_to_i32(9), -5);
        assert_eq!(rice_signed_to_i32(u32::MAX), -2_147_483_648);
    }

    #[test]
    fn rice_round_trips_for_all_k_and_a_spread_of_values() {
        fn zigzag_encode(v: i32) -> u32 {
            ((v << 1) ^ (v >> 31)) as u32
        }

        let values: Vec<i32> = (-15..15)
            .map(|i| i * 1000)
            .chain([-32768, -32767, -1, 0, 1, 32767])
            .collect();

        for k in 0..=30u32 {
            for &v in &values {
                let word = zigzag_encode(v);
                let mask = if k == 0 { 0 } else { (1u32 << k) - 1 };
                let q = word >> k;
                let r = word & mask;
                let rejoined = (q << k) | r;
                assert_eq!(rejoined, word, "k={} v={}", k, v);
                assert_eq!(rice_signed_to_i32(rejoined), v, "k={} v={}", k, v);
            }
        }
    }

    #[test]
    fn lpc_predict_4_reproduces_linear_ramp_from_zero_residual() {
        // y[n] = 2*y[n-1] - y[n-2] reproduces a step-1 ramp; coeffs are stored with the
        // lag-1 coefficient at the highest index.
        let mut coeffs = [0i32; 4];
        coeffs[3] = 2;
        coeffs[2] = -1;
        let mut buf = [0i32, 1, 0, 0, 0, 0];
        lpc_predict_4(2, &coeffs, 0, &mut buf);
        assert_eq!(buf, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn fixed_predictor_order_0_is_identity() {
        let mut buf = [1, 2, 3, 4];
        fixed_predict(0, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn fixed_predictor_order_1_accumulates() {
        // Residual of all zeros after a constant warm-up reproduces the warm-up value.
        let mut buf = [5, 0, 0, 0];
        fixed_predict(1, &mut buf);
        assert_eq!(buf, [5, 5, 5, 5]);
    }

    #[test]
    fn mid_side_reconstructs_left_right() {
        // Encoder side: mid = (left + right) >> 1 (floor), side = left - right.
        let left = 100i32;
        let right = 40i32;
        let mid = (left + right) >> 1;
        let side = left - right;

        let mut mid_buf = [mid];
        let mut side_buf = [side];
        decorrelate_mid_side(&mut mid_buf, &mut side_buf);

        assert_eq!(mid_buf[0], left);
        assert_eq!(side_buf[0], right);
    }

    #[test]
    fn left_side_reconstructs_right() {
        let left = 10i32;
        let right = 3i32;
        let mut side = [left - right];
        decorrelate_left_side(&[left], &mut side);
        assert_eq!(side[0], right);
    }
}
