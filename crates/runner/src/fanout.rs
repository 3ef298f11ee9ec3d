#![forbid(unsafe_code)]

use crate::RunnerError;
use std::sync::Mutex;

/// Runs `worker` once per list on its own thread and waits for all of them. Every failure is
/// logged; the first one recorded is returned. Workers are never cancelled.
pub fn run_all<F>(list_names: &[String], worker: F) -> Result<(), RunnerError>
where
    F: Fn(&str) -> Result<(), RunnerError> + Sync,
{
    let failures: Mutex<Vec<RunnerError>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for name in list_names {
            let worker = &worker;
            let failures = &failures;
            scope.spawn(move || {
                if let Err(err) = worker(name) {
                    tracing::error!(list = %name, error = %err, "quant worker failed");
                    match failures.lock() {
                        Ok(mut guard) => guard.push(err),
                        Err(poisoned) => poisoned.into_inner().push(err),
                    }
                }
            });
        }
    });

    let mut failures = failures
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.remove(0))
    }
}
