// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `error` module defines the common error type returned by the fallible, non-hot-path
//! entry points of this crate (construction, raw parameter setup, metadata parsing). The
//! streaming decode entry point does not use this type; see [`crate::Status`] instead.

use std::error::Error as StdError;
use std::fmt;

/// `Error` enumerates every reason a non-streaming call into this crate can fail.
#[derive(Debug)]
pub enum Error {
    /// The stream contained malformed data that could not be decoded.
    DecodeError(&'static str),
    /// An unsupported stream feature was encountered.
    Unsupported(&'static str),
    /// The caller-provided buffer was too small to hold the requested data.
    BufferTooSmall,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DecodeError(msg) => write!(f, "malformed stream: {}", msg),
            Error::Unsupported(feature) => write!(f, "unsupported feature: {}", feature),
            Error::BufferTooSmall => write!(f, "caller-provided buffer is too small"),
        }
    }
}

impl StdError for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create an unsupported-feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}
