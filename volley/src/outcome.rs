use std::fmt::Display;
use std::time::Duration;

/// What a scenario invocation hands back to its virtual user.
///
/// `()` means success with no think time, a [`Duration`] is the think time to sleep before
/// the next iteration, and an `Err` marks the iteration as failed.
pub trait IterationOutcome {
    fn into_outcome(self) -> Result<Duration, String>;
}

impl IterationOutcome for () {
    fn into_outcome(self) -> Result<Duration, String> {
        Ok(Duration::ZERO)
    }
}

impl IterationOutcome for Duration {
    fn into_outcome(self) -> Result<Duration, String> {
        Ok(self)
    }
}

impl<T: IterationOutcome, E: Display> IterationOutcome for Result<T, E> {
    fn into_outcome(self) -> Result<Duration, String> {
        self.map_err(|e| e.to_string()).and_then(T::into_outcome)
    }
}
