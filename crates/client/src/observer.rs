use async_trait::async_trait;
use std::sync::Arc;

use drover_core::PollSnapshot;

/// Receives one snapshot per poll, plus the synthetic snapshot emitted
/// right after session creation. Delivery is awaited inline with the
/// polling loop, so a slow observer slows polling down with it.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_snapshot(&self, snapshot: &PollSnapshot);
}

/// Adapter for plain closures, the common case for CLI progress lines.
pub struct FnObserver<F>
where
    F: Fn(&PollSnapshot) + Send + Sync,
{
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&PollSnapshot) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ProgressObserver for FnObserver<F>
where
    F: Fn(&PollSnapshot) + Send + Sync,
{
    async fn on_snapshot(&self, snapshot: &PollSnapshot) {
        (self.f)(snapshot)
    }
}

/// Sits between the polling loop and the observer. Remembers the last
/// entry URL seen so that snapshots from polls where the service omitted
/// the URL still carry it. A URL once observed is never cleared.
pub struct ObserverBridge {
    observer: Option<Arc<dyn ProgressObserver>>,
    last_url: Option<String>,
}

impl ObserverBridge {
    pub fn new(observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self {
            observer,
            last_url: None,
        }
    }

    pub async fn notify(&mut self, mut snapshot: PollSnapshot) {
        let has_url = snapshot
            .entry_url
            .as_deref()
            .map_or(false, |u| !u.is_empty());
        if has_url {
            self.last_url = snapshot.entry_url.clone();
        } else {
            snapshot.entry_url = self.last_url.clone();
        }
        if let Some(observer) = &self.observer {
            observer.on_snapshot(&snapshot).await;
        }
    }
}
