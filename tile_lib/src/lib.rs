// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Tile variant library: a concurrent deduplicating registry mapping
// (tag, sequence hash) to compact variant ids, plus the framed record
// stream it is persisted as, the shard merger, the global renumber pass
// (tidy), and the tag-range splitter feeding the matrix builder.

pub mod library;
pub mod merge;
pub mod records;
pub mod slice;
pub mod tidy;

pub use crate::library::{hash_tile, LibraryOpts, TileLibrary};
pub use crate::merge::merge_libraries;
pub use crate::records::{read_library, write_library, LibRecord, LibraryReader, LibraryWriter};
pub use crate::slice::{slice_file_name, slice_range, write_slices};
pub use crate::tidy::{tidy, RemapTable};
