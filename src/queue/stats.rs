use std::fmt;

/// Snapshot of a patch queue's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Patches ready to be consumed.
    pub buffered: usize,
    /// Maximum number of buffered patches.
    pub capacity: usize,
    /// Passes over the subject pool started so far.
    pub passes_started: usize,
    /// Patches pushed into the buffer.
    pub produced: usize,
    /// Patches handed to the consumer.
    pub consumed: usize,
    /// Subjects that failed to load or sample.
    pub failed_subjects: usize,
    /// Patches drawn after production halted on a failure, never buffered.
    pub discarded: usize,
    /// Producers holding a finished unit, waiting for room or for their turn.
    pub blocked_producers: usize,
    /// Producer threads still running.
    pub active_producers: usize,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Patch Queue Statistics:")?;
        writeln!(f, "  Buffered: {}/{} patches", self.buffered, self.capacity)?;
        writeln!(f, "  Passes started: {}", self.passes_started)?;
        writeln!(
            f,
            "  Patches produced/consumed: {}/{}",
            self.produced, self.consumed
        )?;
        writeln!(f, "  Failed subjects: {}", self.failed_subjects)?;
        if self.discarded > 0 {
            writeln!(f, "  Discarded after halt: {}", self.discarded)?;
        }
        writeln!(
            f,
            "  Producers: {} active, {} blocked",
            self.active_producers, self.blocked_producers
        )?;
        Ok(())
    }
}
