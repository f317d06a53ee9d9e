// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operators that originate entries from external byte streams.

use tokio_util::codec::AnyDelimiterCodec;

pub mod stdin;
pub mod tcp;
pub mod tls;

/// Frames a byte stream on `\n` without requiring the lines to be UTF-8.
pub(crate) fn line_codec(max_log_size: usize) -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_log_size)
}

/// Line text without a trailing `\r`. Invalid UTF-8 is replaced, not rejected.
pub(crate) fn line_text(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
