// ⚙️ Background Jobs - run a pipeline stage off the caller's thread
// The job runs on a named thread and reports one result over a channel.
// There is no cancellation; a job runs to completion or failure.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

pub struct JobHandle<T> {
    name: String,
    rx: Receiver<Result<T>>,
    handle: Option<JoinHandle<()>>,
}

/// Spawn `job` on a dedicated thread named `name`
pub fn spawn_job<T, F>(name: &str, job: F) -> Result<JobHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let thread_name = name.to_string();

    let handle = thread::Builder::new()
        .name(format!("job-{}", name))
        .spawn(move || {
            debug!(job = %thread_name, "Job started");
            let result = job();
            if let Err(e) = &result {
                error!(job = %thread_name, error = %e, "Job failed");
            }
            // Receiver may already be gone if the caller dropped the handle
            let _ = tx.send(result);
        })
        .with_context(|| format!("Failed to spawn job thread: {}", name))?;

    Ok(JobHandle {
        name: name.to_string(),
        rx,
        handle: Some(handle),
    })
}

impl<T> JobHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the job finishes
    pub fn wait(mut self) -> Result<T> {
        let received = self.rx.recv();
        let joined = self.handle.take().map(|h| h.join());

        match received {
            Ok(result) => result,
            Err(_) => match joined {
                Some(Err(_)) => Err(anyhow!("Job '{}' panicked", self.name)),
                _ => Err(anyhow!("Job '{}' ended without a result", self.name)),
            },
        }
    }

    /// Non-blocking poll; `None` while the job is still running
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.handle.take();
                Some(Err(anyhow!("Job '{}' ended without a result", self.name)))
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_job_returns_value() {
        let job = spawn_job("sum", || Ok((1..=4).sum::<i32>())).unwrap();
        assert_eq!(job.name(), "sum");
        assert_eq!(job.wait().unwrap(), 10);
    }

    #[test]
    fn test_job_error_propagates() {
        let job = spawn_job::<(), _>("fail", || Err(anyhow!("bad input"))).unwrap();
        let err = job.wait().unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn test_job_panic_is_reported() {
        let job = spawn_job::<(), _>("boom", || panic!("boom")).unwrap();
        let err = job.wait().unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn test_try_result_polls_until_done() {
        let mut job = spawn_job("slow", || {
            thread::sleep(Duration::from_millis(20));
            Ok("done")
        })
        .unwrap();

        let mut result = None;
        for _ in 0..200 {
            if let Some(r) = job.try_result() {
                result = Some(r);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(result.unwrap().unwrap(), "done");
    }
}
