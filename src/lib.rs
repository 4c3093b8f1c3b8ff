// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A pure Rust, streaming FLAC and Ogg-FLAC decoder.
//!
//! Unlike a typical `Decoder` in this crate's lineage, [`FlacDriver`] does not own its input: it
//! is fed byte spans as they become available and suspends, via a [`Status`] return value,
//! whenever it needs more input or more output space than it was given. This suits callers that
//! stream a file a chunk at a time rather than seeking freely over a `MediaSourceStream`.
//!
//! ```no_run
//! use flac_stream::{FlacDriver, Status};
//!
//! let mut driver = FlacDriver::new();
//! let data = std::fs::read("example.flac").unwrap();
//! let mut bytes_left = data.len();
//! let mut output = vec![0i32; 4096];
//!
//! loop {
//!     match driver.decode(&data[data.len() - bytes_left..], &mut bytes_left, &mut output) {
//!         Status::Stop | Status::Err => break,
//!         Status::GiveNextLoop => {
//!             let n = driver.take_output_samples();
//!             println!("got {} samples", n);
//!         }
//!         _ => {}
//!     }
//!     if bytes_left == 0 {
//!         break;
//!     }
//! }
//! ```

mod bitreader;
mod decoder;
mod error;
mod frame;
mod metadata;
mod ogg;
mod subframe;

pub use decoder::{FlacDriver, Status, MAX_BLOCK_SIZE};
pub use error::{Error, Result};
pub use metadata::{MetadataBlock, PictureSpan, StreamInfo, VorbisTags};
