//! Path normalization and hash paths.
//!
//! A path is split on `/` with empty and `.` segments dropped, so `""`,
//! `"/"` and `"./"` all name the root. Each segment hashes to 32 base-4
//! digits (the first 64 bits of its blake3 hash). Every segment's digits
//! are followed by [`SEPARATOR`], except the last segment of a key which is
//! followed by [`END`]. No key's hash path is a prefix of another's, while a
//! directory's prefix ([`prefix_path`]) is a prefix of every key below it.

use crate::error::TrieError;

/// Digits produced per segment.
pub const SEGMENT_DIGITS: usize = 32;

/// Digits per segment including its terminator.
pub const SEGMENT_WIDTH: usize = SEGMENT_DIGITS + 1;

/// Terminator after a segment with more segments following.
pub const SEPARATOR: u8 = 4;

/// Terminator after the final segment of a key.
pub const END: u8 = 5;

/// Split a path into its segments.
pub fn normalize(path: &str) -> Result<Vec<&str>, TrieError> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(TrieError::InvalidPath(path.to_string())),
            segment => segments.push(segment),
        }
    }
    Ok(segments)
}

/// Canonical key for a path: segments joined by `/`, no leading slash.
pub fn key(path: &str) -> Result<String, TrieError> {
    Ok(normalize(path)?.join("/"))
}

/// Display form of a key: `/` followed by the key.
pub fn display(key: &str) -> String {
    format!("/{key}")
}

fn push_segment(digits: &mut Vec<u8>, segment: &str) {
    let hash = blake3::hash(segment.as_bytes());
    for byte in &hash.as_bytes()[..SEGMENT_DIGITS / 4] {
        for shift in [6, 4, 2, 0] {
            digits.push((byte >> shift) & 0b11);
        }
    }
}

/// Hash path of a key with the given segments.
pub fn hash_path(segments: &[&str]) -> Vec<u8> {
    let mut digits = Vec::with_capacity(segments.len() * SEGMENT_WIDTH);
    for (i, segment) in segments.iter().enumerate() {
        push_segment(&mut digits, segment);
        digits.push(if i + 1 == segments.len() { END } else { SEPARATOR });
    }
    digits
}

/// Digit prefix shared by every key below the directory `segments`.
pub fn prefix_path(segments: &[&str]) -> Vec<u8> {
    let mut digits = Vec::with_capacity(segments.len() * SEGMENT_WIDTH);
    for segment in segments {
        push_segment(&mut digits, segment);
        digits.push(SEPARATOR);
    }
    digits
}
