pub enum DaemonEvent {
    /// Poll interval elapsed; run a full reconcile + poll + record cycle.
    Poll,
    /// The pending-changes file was written; reconcile without waiting for the next poll.
    UpdatesChanged,
    /// A capture subprocess for `uid` ended, either stopped or on its own.
    CaptureExited { uid: u64 },
    /// Ctrl+C received; the daemon should stop all captures and exit.
    Shutdown,
}
