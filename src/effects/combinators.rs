//! Continuation-passing combinators.
//!
//! A [`Step<I, A>`] is a computation that eventually produces an `A` by
//! issuing effects through the interpreter `I`. Steps compose with
//! [`Step::and_then`] and are turned into an interpreter value with
//! [`Step::finish`]. Nothing runs until an executor walks the result.

use bytes::Bytes;
use std::fmt;

use crate::effects::{AsyncTask, Continuation, Interpreter, InterpreterExt};
use crate::error::{QueryError, ServerError, TaskError};
use crate::query::QuerySpec;
use crate::session::Session;

type Run<I, A> = Box<dyn FnOnce(Continuation<A, I>) -> I + Send>;

pub struct Step<I, A> {
    run: Run<I, A>,
}

impl<I: Interpreter, A: Send + 'static> Step<I, A> {
    /// A step from a function that is given the rest of the chain.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(Continuation<A, I>) -> I + Send + 'static,
    {
        Self { run: Box::new(run) }
    }

    pub fn pure(value: A) -> Self {
        Self::new(move |k| k(value))
    }

    pub fn and_then<B, F>(self, f: F) -> Step<I, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Step<I, B> + Send + 'static,
    {
        let run = self.run;
        Step::new(move |k: Continuation<B, I>| run(Box::new(move |a| (f(a).run)(k))))
    }

    pub fn map<B, F>(self, f: F) -> Step<I, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        let run = self.run;
        Step::new(move |k: Continuation<B, I>| run(Box::new(move |a| k(f(a)))))
    }

    /// Run `cleanup` once the rest of the chain has reached its terminal
    /// effect, or when the chain is dropped before getting there.
    pub fn scoped<C>(self, cleanup: C) -> Step<I, A>
    where
        C: FnOnce() + Send + 'static,
    {
        let run = self.run;
        Step::new(move |k: Continuation<A, I>| {
            let guard = Scoped::new((), move |()| cleanup());
            run(Box::new(move |a| I::ensure(k(a), move || guard.release())))
        })
    }

    /// Hand the final value to a terminal-producing function.
    pub fn finish<F>(self, f: F) -> I
    where
        F: FnOnce(A) -> I + Send + 'static,
    {
        (self.run)(Box::new(f))
    }
}

impl<I: Interpreter> Step<I, Option<Session>> {
    pub fn session() -> Self {
        Self::new(|k| I::with_session(k))
    }
}

impl<I: Interpreter> Step<I, Bytes> {
    pub fn body() -> Self {
        Self::new(|k| I::with_request_body(k))
    }
}

impl<I: Interpreter, T: Send + 'static> Step<I, Result<T, QueryError>> {
    pub fn query(query: QuerySpec<T>) -> Self {
        Self::new(move |k| I::run_query(query, k))
    }
}

impl<I: Interpreter, T: Send + 'static> Step<I, Result<T, TaskError>> {
    pub fn task(task: AsyncTask<T>) -> Self {
        Self::new(move |k| I::await_async(task, k))
    }
}

impl<I, T, E> Step<I, Result<T, E>>
where
    I: Interpreter,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn map_result<U, F>(self, f: F) -> Step<I, Result<U, E>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map(|result| result.map(f))
    }

    /// Sequence on success; a failure skips `f` and is forwarded.
    pub fn and_then_ok<U, F>(self, f: F) -> Step<I, Result<U, E>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Step<I, Result<U, E>> + Send + 'static,
    {
        self.and_then(|result| match result {
            Ok(value) => f(value),
            Err(e) => Step::pure(Err(e)),
        })
    }

    /// End the chain with an error page on failure.
    pub fn or_fail(self) -> Step<I, T>
    where
        E: Into<ServerError>,
    {
        let run = self.run;
        Step::new(move |k: Continuation<T, I>| {
            run(Box::new(move |result| match result {
                Ok(value) => k(value),
                Err(e) => I::write_error(e.into()),
            }))
        })
    }
}

impl<I, A> fmt::Debug for Step<I, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Step")
    }
}

/// A resource released exactly once: explicitly through [`Scoped::release`]
/// or, failing that, when the guard is dropped.
pub struct Scoped<R> {
    resource: Option<R>,
    release: Option<Box<dyn FnOnce(R) + Send>>,
}

impl<R> Scoped<R> {
    pub fn new<F>(resource: R, release: F) -> Self
    where
        F: FnOnce(R) + Send + 'static,
    {
        Self {
            resource: Some(resource),
            release: Some(Box::new(release)),
        }
    }

    /// The guarded resource, until it has been released.
    pub fn as_mut(&mut self) -> Option<&mut R> {
        self.resource.as_mut()
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let (Some(resource), Some(release)) = (self.resource.take(), self.release.take()) {
            release(resource);
        }
    }
}

impl<R> Drop for Scoped<R> {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl<R> fmt::Debug for Scoped<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped")
            .field("held", &self.resource.is_some())
            .finish()
    }
}
