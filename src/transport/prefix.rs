//! Chunk merging for queued socket buffers.

use std::collections::VecDeque;

/// Replace the first chunks of `buf` with a single chunk of up to `size`
/// bytes, splitting a chunk when it straddles the boundary.
///
/// ```text
/// ["abc", "de", "fghi", "j"], 5  => ["abcde", "fghi", "j"]
/// ["abcde", "fghi", "j"], 7      => ["abcdefg", "hi", "j"]
/// ["abcdefg", "hi", "j"], 3      => ["abc", "defg", "hi", "j"]
/// ["abc", "defg", "hi", "j"], 100 => ["abcdefghij"]
/// ```
pub fn merge_prefix(buf: &mut VecDeque<Vec<u8>>, size: usize) {
    if buf.len() == 1 && buf[0].len() <= size {
        return;
    }
    if buf.is_empty() || size == 0 {
        return;
    }

    let mut prefix = Vec::with_capacity(size.min(buf.iter().map(Vec::len).sum()));
    while let Some(mut chunk) = buf.pop_front() {
        let remaining = size - prefix.len();
        if chunk.len() > remaining {
            let tail = chunk.split_off(remaining);
            buf.push_front(tail);
        }
        prefix.extend_from_slice(&chunk);
        if prefix.len() >= size {
            break;
        }
    }
    buf.push_front(prefix);
}
