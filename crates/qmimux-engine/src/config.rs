use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Reader buffer size. The channel preserves message boundaries, so one
    /// read yields one frame; this bounds the largest accepted frame.
    pub read_buffer_size: usize,
    /// Absolute budget for one control-plane call, shared across its retry
    /// loop (not reset per dequeue).
    pub ctl_deadline: Duration,
    /// How many non-matching control replies a call dequeues before giving
    /// up ahead of the deadline.
    pub ctl_mismatch_budget: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            ctl_deadline: Duration::from_millis(5000),
            ctl_mismatch_budget: 5,
        }
    }
}
