use wasync_store::FieldWrite;

/// Merge strategy for counters carried on partial updates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CounterMerge {
    /// Positive values are deltas added to the stored count; zero or negative
    /// values replace it. A "mark as read" arrives as `0`.
    // Unclear whether the transport ever sends a genuine negative delta.
    #[default]
    AddPositiveReplaceOtherwise,
}

impl CounterMerge {
    pub fn write(self, incoming: i64) -> FieldWrite {
        match self {
            Self::AddPositiveReplaceOtherwise if incoming > 0 => FieldWrite::Increment(incoming),
            Self::AddPositiveReplaceOtherwise => FieldWrite::Set(incoming.into()),
        }
    }

    /// Value the stored counter ends up with.
    pub fn apply(self, stored: Option<i64>, incoming: i64) -> i64 {
        match self.write(incoming) {
            FieldWrite::Increment(delta) => stored.unwrap_or(0) + delta,
            _ => incoming,
        }
    }
}
