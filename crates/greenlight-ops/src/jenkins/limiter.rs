//! Per-project trigger concurrency. One semaphore per project name, created
//! lazily under a one-time lock and kept for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::Semaphore;

fn limiters() -> &'static Mutex<HashMap<String, Arc<Semaphore>>> {
    static LIMITERS: OnceLock<Mutex<HashMap<String, Arc<Semaphore>>>> = OnceLock::new();
    LIMITERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The semaphore for `project`, creating it with `capacity` permits on
/// first use. Capacity is clamped to ≥ 1 so a misconfigured zero can never
/// deadlock the fan-out; later capacity values do not resize an existing
/// semaphore.
pub fn project_limiter(project: &str, capacity: usize) -> Arc<Semaphore> {
    let mut map = limiters().lock().unwrap_or_else(|e| e.into_inner());
    map.entry(project.to_string())
        .or_insert_with(|| Arc::new(Semaphore::new(capacity.max(1))))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_clamped() {
        let sem = project_limiter("limiter-test-zero", 0);
        assert_eq!(sem.available_permits(), 1);
    }

    #[test]
    fn same_project_shares_one_semaphore() {
        let a = project_limiter("limiter-test-shared", 2);
        let b = project_limiter("limiter-test-shared", 99);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.available_permits(), 2);
    }

    #[tokio::test]
    async fn permits_bound_concurrency() {
        let sem = project_limiter("limiter-test-permits", 1);
        let first = sem.clone().acquire_owned().await.unwrap();
        assert_eq!(sem.available_permits(), 0);
        drop(first);
        assert_eq!(sem.available_permits(), 1);
    }
}
