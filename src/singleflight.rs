use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::oneshot;

type Waiters<T> = Vec<oneshot::Sender<T>>;

/// Collapses concurrent calls for the same key onto one execution. Every
/// caller registered while the call runs receives a clone of its result,
/// in registration order.
pub struct Group<T> {
    inner: Arc<Mutex<HashMap<String, Waiters<T>>>>,
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Group<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` only if the call died without producing a result.
    pub async fn do_call<F, Fut>(&self, key: &str, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.inner.lock().expect("singleflight group");
            if let Some(waiters) = map.get_mut(key) {
                waiters.push(tx);
            } else {
                map.insert(key.to_string(), vec![tx]);
                tokio::spawn(run_call(Arc::clone(&self.inner), key.to_string(), f));
            }
        }
        rx.await.ok()
    }
}

async fn run_call<T, F, Fut>(map: Arc<Mutex<HashMap<String, Waiters<T>>>>, key: String, f: F)
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let result = AssertUnwindSafe(f()).catch_unwind().await;
    let waiters = {
        let mut map = map.lock().expect("singleflight group");
        map.remove(&key).unwrap_or_default()
    };
    let Ok(result) = result else {
        log::error!("singleflight call for {key} panicked");
        return;
    };
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}
