//! Merging of extracted page lemmas into the per-site inverted index.

pub mod merger;

pub use merger::IndexMerger;
