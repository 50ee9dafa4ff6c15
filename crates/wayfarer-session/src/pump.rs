//! UI dispatch integration.

/// The embedder's UI dispatch queue, consulted for the session busy flag.
pub trait DispatchPump: Send + Sync {
    /// Whether UI work triggered by scripts is still pending.
    fn is_busy(&self) -> bool;
}
