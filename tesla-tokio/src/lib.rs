//! Async client for the Tesla owner API: transport, retry policy, vehicle data
//! cache, adaptive polling and the wake-retry command protocol.
#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::use_self)]

pub mod api;
pub mod cache;
pub mod controller;
pub mod energy;
pub mod error;
pub mod poller;
pub mod polling;
pub mod retry;
pub mod testing;
pub mod vehicle;

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawn a task and automatically monitor its execution.
pub fn spawn<T>(future: T) -> JoinHandle<()>
where
    T: Future + Send + 'static,
    T::Output: Send + 'static,
{
    let task = tokio::spawn(future);

    tokio::spawn(async move {
        let rc = task.await;

        match rc {
            Ok(_rc) => {
                debug!("The task terminated normally");
            }
            Err(err) => {
                error!("The task aborted with error: {err}");
            }
        };
    })
}
