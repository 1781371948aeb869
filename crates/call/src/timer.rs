//! Timer-Tasks des Calls

use std::future::Future;

use tokio::task::JoinHandle;

/// Handle auf einen Timer-Task, der beim Drop abgebrochen wird
#[derive(Debug)]
pub struct TimerHandle(JoinHandle<()>);

impl TimerHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
