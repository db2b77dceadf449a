use std::num::NonZeroUsize;

use uuid::Uuid;

use crate::error::AcknowledgementError;

/// A reference to one received message, carrying what the backend needs to commit it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    /// Opaque identifier of the message, used for logging and error reporting.
    id: Uuid,
    /// The backend specific token used to commit the message (e.g. an SQS receipt handle).
    receipt_handle: String,
    /// Message group of the message, if the queue partitions messages into groups.
    group: Option<String>,
}

impl MessageHandle {
    pub fn new(id: Uuid, receipt_handle: impl Into<String>) -> Self {
        Self {
            id,
            receipt_handle: receipt_handle.into(),
            group: None,
        }
    }

    /// Assign this message to a message group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }
}

/// A non-empty group of messages to be committed in a single backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    handles: Vec<MessageHandle>,
}

impl Batch {
    /// Build a batch, checking it holds at least one and at most `max_size` handles.
    pub fn new(
        handles: Vec<MessageHandle>,
        max_size: NonZeroUsize,
    ) -> Result<Self, AcknowledgementError> {
        if handles.is_empty() || handles.len() > max_size.get() {
            return Err(AcknowledgementError::InvalidBatch {
                size: handles.len(),
                max: max_size.get(),
            });
        }

        Ok(Self { handles })
    }

    /// Only used by the partitioner, which guarantees the size bounds itself.
    pub(crate) fn from_chunk(handles: Vec<MessageHandle>) -> Self {
        debug_assert!(!handles.is_empty());
        Self { handles }
    }

    pub fn handles(&self) -> &[MessageHandle] {
        &self.handles
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.handles.iter().map(MessageHandle::id).collect()
    }

    pub fn receipt_handles(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(MessageHandle::receipt_handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Always false, batches are never empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn into_handles(self) -> Vec<MessageHandle> {
        self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(receipt: &str) -> MessageHandle {
        MessageHandle::new(Uuid::now_v7(), receipt)
    }

    #[test]
    fn test_batch_rejects_empty_and_oversized() {
        let max = NonZeroUsize::new(2).unwrap();

        assert_eq!(
            Batch::new(vec![], max),
            Err(AcknowledgementError::InvalidBatch { size: 0, max: 2 })
        );
        assert_eq!(
            Batch::new(vec![handle("a"), handle("b"), handle("c")], max),
            Err(AcknowledgementError::InvalidBatch { size: 3, max: 2 })
        );

        let batch = Batch::new(vec![handle("a"), handle("b")], max).expect("batch is valid");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.receipt_handles().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_handle_group() {
        let ungrouped = handle("a");
        assert_eq!(ungrouped.group(), None);

        let grouped = handle("b").with_group("group-1");
        assert_eq!(grouped.group(), Some("group-1"));
        assert_eq!(grouped.receipt_handle(), "b");
    }
}
