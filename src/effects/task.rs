//! Asynchronous external calls.

use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;

use crate::error::TaskError;

/// What a task does, for logs and for test stubs to match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescription {
    /// Stable operation name, e.g. `mailer.send`.
    pub name: String,
    /// Free-form detail such as the account or recipient.
    pub detail: String,
}

impl fmt::Display for TaskDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} ({})", self.name, self.detail)
        }
    }
}

/// A described, not yet started asynchronous call producing `T`.
pub struct AsyncTask<T> {
    description: TaskDescription,
    future: BoxFuture<'static, Result<T, TaskError>>,
}

impl<T: Send + 'static> AsyncTask<T> {
    pub fn new<F>(name: impl Into<String>, detail: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self {
            description: TaskDescription {
                name: name.into(),
                detail: detail.into(),
            },
            future: future.boxed(),
        }
    }

    /// A task whose outcome is already known.
    pub fn ready(name: impl Into<String>, detail: impl Into<String>, result: Result<T, TaskError>) -> Self {
        Self::new(name, detail, future::ready(result))
    }

    pub fn description(&self) -> &TaskDescription {
        &self.description
    }

    pub fn map<U, F>(self, f: F) -> AsyncTask<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        AsyncTask {
            description: self.description,
            future: self.future.map(|result| result.map(f)).boxed(),
        }
    }

    pub fn into_future(self) -> BoxFuture<'static, Result<T, TaskError>> {
        self.future
    }
}

impl<T> fmt::Debug for AsyncTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn map_keeps_the_description() {
        let task = AsyncTask::new("billing.coupon", "SPRING", async { Ok(20u32) }).map(|n| n * 2);
        assert_eq!(task.description().to_string(), "billing.coupon (SPRING)");
        assert_eq!(task.into_future().await, Ok(40));
    }

    #[tokio::test]
    async fn failures_pass_through_map() {
        let task = AsyncTask::<u32>::ready("mailer.send", "", Err(TaskError::Failed("smtp down".into())))
            .map(|n| n + 1);
        assert_eq!(task.description().to_string(), "mailer.send");
        assert_eq!(task.into_future().await, Err(TaskError::Failed("smtp down".into())));
    }
}
