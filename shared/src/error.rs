use thiserror::Error;

/// A request targeted a chunk or block outside the region that owns it.
/// Returned as a well-defined rejection (never fatal) — see spec §7,
/// "Out-of-region".
#[derive(Clone, Copy, Debug, Error)]
#[error("coordinate is outside the owning region")]
pub struct OutOfRegion;

/// Cooperative cancellation was observed at a suspension point. Propagated
/// up the call chain; never converted into a fatal error (spec §7, "Cancelled").
#[derive(Clone, Copy, Debug, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;
