//! Acknowledgement decision for a consumed message.

/// Outcome of the local retry loop for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Succeeded,
    Failed,
}

/// What to do with the broker message after processing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Let the ack wait expire so the broker redelivers later
    LeaveUnacked,
    /// Publish a dead-letter record, then ack to stop redelivery
    DeadLetterThenAck,
}

/// Failing messages are redelivered until the broker has redelivered them
/// more than `threshold` times, then dead-lettered once.
pub fn decide(attempt: AttemptResult, redelivery_count: u64, threshold: u64) -> Disposition {
    match attempt {
        AttemptResult::Succeeded => Disposition::Ack,
        AttemptResult::Failed if redelivery_count > threshold => Disposition::DeadLetterThenAck,
        AttemptResult::Failed => Disposition::LeaveUnacked,
    }
}
