//! `disk-sort` is a line-oriented external sort.
//!
//! It sorts text that does not have to fit into memory: input lines are collected into chunks of bounded size,
//! every chunk is sorted in memory and spilled to a temporary file in a scratch directory, then all spilled
//! chunks are merged into a single sorted stream with a binary heap (k-way merge).
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   at most `block_size` lines (5000 by default) are held in memory at a time, or a byte budget with the
//!   `memory-limit` feature.
//! * **Whole-line ordering:**
//!   lines are compared lexicographically as a whole. Duplicates are kept unless unique mode is requested.
//! * **Scoped temporary files:**
//!   every spill file is owned by the sort that created it and removed as soon as the merge exhausts it,
//!   or when the sort fails.
//! * **Pluggable spill format:**
//!   plain text by default, MessagePack via [`RmpExternalChunk`].
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io::{self, prelude::*};
//! use std::path;
//!
//! use disk_sort::sort_on_disk;
//!
//! fn main() {
//!     let input = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!
//!     let sorted = sort_on_disk(input, path::Path::new("./"), 5000).unwrap();
//!
//!     for line in sorted.sorted_lines().map(Result::unwrap) {
//!         println!("{}", line);
//!     }
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod line;
pub mod merger;
pub mod sort;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, LimitedBuffer, LimitedBufferBuilder, DEFAULT_BLOCK_SIZE};
pub use chunk::{EmbeddedTerminatorError, ExternalChunk, ExternalChunkError, RmpExternalChunk, SpillFile, TextExternalChunk};
pub use line::LineReader;
pub use merger::BinaryHeapMerger;
pub use sort::{sort_on_disk, ChunkSortError, ExternalSorter, ExternalSorterBuilder, SortError, SortedOutput};
