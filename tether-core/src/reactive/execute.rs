//! Async Operations
//!
//! Helpers that mirror the progress of a future into a state object:
//!
//! - `loading`: `true` while the future is pending
//! - `error`: `null`, or the error message of the last failure
//! - `data`: the serialized output of the last success
//!
//! Each phase is written in one batch, so consumers see `loading` and
//! `error` change together. The reactive core itself never awaits.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::state::State;

/// Failure of [`execute_with_timeout`].
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

fn begin(state: &State) {
    let write = || {
        state.set("loading", true);
        state.set("error", Value::Null);
    };
    match state.runtime() {
        Some(rt) => rt.batch(write),
        None => write(),
    }
}

fn finish(state: &State, outcome: Result<Value, String>) {
    let write = || {
        match outcome {
            Ok(data) => {
                state.set("data", data);
            }
            Err(message) => {
                state.set("error", message);
            }
        }
        state.set("loading", false);
    };
    match state.runtime() {
        Some(rt) => rt.batch(write),
        None => write(),
    }
}

fn serialized<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|err| err.to_string())
}

/// Await `operation`, recording its progress in `state`.
///
/// The result is handed back unchanged.
pub async fn execute<T, E, F>(state: &State, operation: F) -> Result<T, E>
where
    T: Serialize,
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    begin(state);
    let result = operation.await;
    match &result {
        Ok(value) => finish(state, serialized(value)),
        Err(err) => finish(state, Err(err.to_string())),
    }
    result
}

/// Like [`execute`], giving up after `limit`.
pub async fn execute_with_timeout<T, E, F>(
    state: &State,
    limit: Duration,
    operation: F,
) -> Result<T, ExecuteError<E>>
where
    T: Serialize,
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    begin(state);
    let result = match tokio::time::timeout(limit, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ExecuteError::Failed(err)),
        Err(_) => {
            debug!(handle = %state.id(), ?limit, "operation timed out");
            Err(ExecuteError::TimedOut(limit))
        }
    };
    match &result {
        Ok(value) => finish(state, serialized(value)),
        Err(err) => finish(state, Err(err.to_string())),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[tokio::test]
    async fn execute_records_success() {
        let rt = Runtime::new();
        let state = rt.state(json!({}));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (source, log) = (state.clone(), seen.clone());
        rt.effect(move || log.borrow_mut().push(source.value("loading")));

        let out = execute(&state, async { Ok::<_, String>(vec![1, 2]) }).await;
        assert_eq!(out, Ok(vec![1, 2]));
        assert_eq!(state.value("data"), json!([1, 2]));
        assert_eq!(state.value("error"), Value::Null);
        assert_eq!(*seen.borrow(), vec![Value::Null, json!(true), json!(false)]);
    }

    #[tokio::test]
    async fn execute_records_failure() {
        let rt = Runtime::new();
        let state = rt.state(json!({"data": "old"}));
        let out = execute(&state, async { Err::<u8, _>("offline") }).await;
        assert_eq!(out, Err("offline"));
        assert_eq!(state.value("error"), json!("offline"));
        assert_eq!(state.value("data"), json!("old"));
        assert_eq!(state.value("loading"), json!(false));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_gives_up() {
        let rt = Runtime::new();
        let state = rt.state(json!({}));
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, String>(1)
        };
        let out = execute_with_timeout(&state, Duration::from_secs(1), slow).await;
        assert!(matches!(out, Err(ExecuteError::TimedOut(_))));
        assert_eq!(state.value("loading"), json!(false));
        assert!(state.value("error").as_str().unwrap().contains("timed out"));
    }
}
