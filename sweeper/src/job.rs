use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Write;

/// Outcome of one run: the number of items the job processed
pub type JobResult = Result<usize, Box<dyn std::error::Error + Send + Sync>>;

/// Unit of work executed by a [`crate::PeriodicTask`]
#[async_trait]
pub trait Job: Send + Sync + Debug + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run the job once.
    ///
    /// Runs never overlap; the task waits for one run to finish (or time out)
    /// before starting the next.
    async fn run(&self) -> JobResult;
}

/// Flattens an error and its sources into one line
pub(crate) fn report(mut err: &dyn std::error::Error) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, ": {}", src);
        err = src;
    }
    s
}
