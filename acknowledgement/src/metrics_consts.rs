// ==== Processor metrics ====
/// Counter for flush cycles of the batching processor, labelled by trigger
pub const FLUSHES: &str = "acknowledgement_flushes_total";

/// Gauge for acknowledgements buffered by the batching processor and not yet flushed
pub const PENDING_MESSAGES: &str = "acknowledgement_pending_messages";

/// Counter for acknowledgements dropped without being committed, labelled by reason
pub const DISCARDED: &str = "acknowledgement_discarded_total";

/// Counter for in-flight commits cancelled when the shutdown timeout expires
pub const CANCELLED: &str = "acknowledgement_cancelled_total";

// ==== Commit metrics ====
/// Counter for batches handed to the executor
pub const BATCHES: &str = "acknowledgement_batches_total";

/// Histogram for the number of messages in each batch handed to the executor
pub const BATCH_SIZE: &str = "acknowledgement_batch_size";

/// Histogram for the time taken by the executor to commit a batch
pub const COMMIT_DURATION: &str = "acknowledgement_commit_duration_seconds";

/// Counter for batches the executor failed to commit
pub const COMMIT_ERRORS: &str = "acknowledgement_commit_errors_total";

// ==== Print executor metrics ====
pub const PRINT_EXECUTOR_MESSAGES: &str = "acknowledgement_print_executor_messages_total";
pub const PRINT_EXECUTOR_BATCH_SIZE: &str = "acknowledgement_print_executor_batch_size";
