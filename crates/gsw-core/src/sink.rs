use anyhow::Result;

/// Capability to push one line of input to the supervised child.
///
/// The ban registry and the request engine hold this instead of the child
/// process itself, so the supervisor stays the process's only owner.
#[async_trait::async_trait]
pub trait CommandSink: Send + Sync {
    /// Write `line` (including its trailing newline) to the child's stdin.
    async fn send_line(&self, line: &str) -> Result<()>;
}
