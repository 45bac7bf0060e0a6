//! Source fetchers.
//!
//! One module per provider. Each fetcher produces provider-tagged raw record
//! blobs and exposes them to the pipeline as an async stream; the record shape
//! is the provider's own and is only interpreted by the normalizer.

pub mod bibliographic;
pub mod citation_index;

use crate::normalize::RawRecord;
use futures::stream::{self, BoxStream, StreamExt};

/// Async sequence of raw records feeding the pipeline.
pub type RecordStream = BoxStream<'static, RawRecord>;

/// Wrap an already-fetched batch as a record stream.
pub fn batch_stream(records: Vec<RawRecord>) -> RecordStream {
    stream::iter(records).boxed()
}
