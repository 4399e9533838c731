//! Block-aligned archive container format
//!
//! An archive is a forward-only stream of records. Every record starts with
//! a fixed-width [`preamble::Preamble`] and an optional CBOR metadata blob,
//! zero-padded together out to a [`BLOCK_SIZE`] boundary, followed by an
//! optional (possibly compressed) body padded the same way. Bodies start
//! and end on block boundaries, so a reader can skip any record without
//! decompressing it.
//!
//! Unless otherwise noted, all fixed-width fields are stored Big Endian.
//!
//! # Preamble
//!
//! | Type     | Name              | Description |
//! | -------: | ----------------- | ----------- |
//! | [u8; 6]  | magic             | `PONZU\0`, rejected on mismatch |
//! | u8       | record type       | See the record type table below |
//! | u8       | compression       | `0` none, `1` zstd, `3` brotli |
//! | u16      | flags             | Interpreted per record type |
//! | u64      | block count       | Whole blocks occupied by the body |
//! | u16      | modulo            | Bytes used in the final body block |
//! | [u8; 32] | body checksum     | BLAKE3 of the body bytes as stored |
//! | u16      | metadata length   | Byte length of the metadata blob |
//! | [u8; 32] | metadata checksum | BLAKE3 of the metadata blob |
//!
//! # Record Types
//!
//! | Tag | Name             | Description |
//! | :-: | ---------------- | ----------- |
//! | 0   | Control          | Archive bracketing (start / end) |
//! | 1   | File             | Regular file, body holds the content |
//! | 2   | Hardlink         | Target held in metadata, no body |
//! | 3   | Symlink          | Target held in metadata, no body |
//! | 4   | Directory        | Metadata only |
//! | 5   | SharedDictionary | Body seeds the zstd codec, never surfaced |
//! | 126 | OsSpecial        | Device nodes and other OS specific entries |
//! | 127 | Continuation     | Next link of an oversized body chain |
//!
//! A body larger than the writer's chunk threshold is split across the
//! initiating record (flagged `Continues`) and a run of `Continuation`
//! records, each carrying its own checksum over its own stored chunk.

pub mod block;
pub mod cli;
pub mod compression;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod preamble;
pub mod reader;
pub mod walk;
pub mod writer;

mod buf;

/// Fixed I/O alignment unit. Must match between the writer and the reader
/// of a given archive, the stream does not self-declare it.
pub const BLOCK_SIZE: u64 = 4096;

/// Leading magic of every record preamble, trailing NUL included.
pub const MAGIC: [u8; 6] = *b"PONZU\0";

/// Version recorded in the start-of-archive metadata.
pub const FORMAT_VERSION: u8 = 1;

/// Width of the BLAKE3 checksums carried in the preamble.
pub const CHECKSUM_LEN: usize = 32;

/// Encoded preamble width: magic + type + compression + flags + block
/// count + modulo + two checksums + metadata length.
pub const PREAMBLE_LEN: usize = 6 + 1 + 1 + 2 + 8 + 2 + CHECKSUM_LEN + 2 + CHECKSUM_LEN;

/// Default in-memory chunk threshold before the writer switches to a
/// continuation chain.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Upper bound on consecutive shared dictionary records the reader will
/// absorb before treating the stream as hostile.
pub(crate) const MAX_DICTIONARY_RECORDS: usize = 8;
