// Test code is allowed to use unwrap()/expect() for convenience.
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)
)]

// Life of a reading:
// 1. JSON comes in on POST /api/vitals
// 2. The record is appended to the data file
// 3. Its offset is inserted into the B-tree under the reading's timestamp,
//    splitting full nodes on the way down
// 4. The metadata record is rewritten with the new cursors and count
//
// Queries walk the B-tree for offsets, then read records from the data file.
//
// System components:
//  - Storage engine (index, data and metadata files)
//  - HTTP layer

pub mod config;
pub mod http;
pub mod storage;
#[cfg(test)]
mod testing;
