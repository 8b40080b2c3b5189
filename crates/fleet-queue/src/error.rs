#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is paused")]
    Paused,

    #[error("queue is full (capacity {0})")]
    Full(usize),

    #[error("item exceeded its deadline")]
    DeadlineExceeded,

    #[error("queue was cleared")]
    Cleared,
}
