use std::num::NonZeroUsize;

use crate::message::{Batch, MessageHandle};

/// Split `handles` into contiguous batches of at most `max_batch_size` handles.
///
/// Input order is preserved across and within batches, only the last batch may be
/// smaller than `max_batch_size`, and an empty input yields no batches at all.
pub fn partition(handles: Vec<MessageHandle>, max_batch_size: NonZeroUsize) -> Vec<Batch> {
    let max_batch_size = max_batch_size.get();
    let mut batches = Vec::with_capacity(handles.len().div_ceil(max_batch_size));
    let mut handles = handles.into_iter().peekable();

    while handles.peek().is_some() {
        batches.push(Batch::from_chunk(
            handles.by_ref().take(max_batch_size).collect(),
        ));
    }

    batches
}
