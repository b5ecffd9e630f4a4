//! Already-completed asynchronous results.
//!
//! Collection operations are synchronous. Callers that speak an asynchronous
//! protocol receive their outcome as an [`AsyncResult`]: a result that is
//! complete on creation and can be `.await`ed. Faults are captured into the
//! result rather than returned early, so producing an `AsyncResult` never
//! fails by itself.
//!
//! # Example
//!
//! ```ignore
//! use docstand_core::{error::MongoError, future::AsyncResult};
//!
//! let ok = AsyncResult::wrap(|| Ok(42));
//! assert_eq!(ok.await?, 42);
//!
//! let failed: AsyncResult<i32> = AsyncResult::wrap(|| Err(MongoError::bad_value("no")));
//! assert!(failed.is_failed());
//! ```

use std::future::IntoFuture;

use futures::future::{Ready, ready};

use crate::error::{MongoError, MongoResult};


/// A completed computation: either its value or the fault it raised.
#[must_use = "an AsyncResult holds a fault that is lost if it is dropped"]
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncResult<T> {
    outcome: MongoResult<T>,
}

impl<T> AsyncResult<T> {
    /// Runs `computation` now and captures its outcome.
    pub fn wrap<F>(computation: F) -> Self
    where
        F: FnOnce() -> MongoResult<T>,
    {
        Self { outcome: computation() }
    }

    /// A result completed with `value`.
    pub fn completed(value: T) -> Self {
        Self { outcome: Ok(value) }
    }

    /// A result completed with `fault`.
    pub fn failed(fault: MongoError) -> Self {
        Self { outcome: Err(fault) }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_failed(&self) -> bool {
        self.outcome.is_err()
    }

    /// Borrows the outcome.
    pub fn result(&self) -> Result<&T, &MongoError> {
        self.outcome.as_ref()
    }

    pub fn fault(&self) -> Option<&MongoError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> MongoResult<T> {
        self.outcome
    }

    /// Transforms the value of a successful result.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AsyncResult<U> {
        AsyncResult { outcome: self.outcome.map(f) }
    }

    /// Turns a fault into a value, producing a result that always succeeds.
    pub fn recover(self, f: impl FnOnce(MongoError) -> T) -> AsyncResult<T> {
        AsyncResult { outcome: Ok(self.outcome.unwrap_or_else(f)) }
    }
}

impl<T> From<MongoResult<T>> for AsyncResult<T> {
    fn from(outcome: MongoResult<T>) -> Self {
        Self { outcome }
    }
}

impl<T> IntoFuture for AsyncResult<T> {
    type Output = MongoResult<T>;
    type IntoFuture = Ready<MongoResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        ready(self.outcome)
    }
}
