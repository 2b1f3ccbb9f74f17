//! Per-call options and result types of the file API.

use reef_types::Stat;

/// Options for [`Drive::write_file`](crate::Drive::write_file).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Permission and type bits; defaults to a regular `0644` file.
    pub mode: Option<u32>,
    /// Modification time in ms since the Unix epoch; defaults to now.
    pub mtime: Option<u64>,
}

/// Byte window for [`Drive::create_read_stream`](crate::Drive::create_read_stream).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// First byte of the file to produce.
    pub start: u64,
    /// Bytes to produce; the rest of the file when `None`.
    pub length: Option<u64>,
}

/// One entry of a directory stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Normalized path with a leading `/`.
    pub path: String,
    pub stat: Stat,
}
