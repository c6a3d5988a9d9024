#[derive(thiserror::Error, Debug)]
pub enum WardenError {
    #[error("child process is already running")]
    ChildAlreadyRunning,

    #[error("child process is not running")]
    ChildNotRunning,
}
