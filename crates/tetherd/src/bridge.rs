//! Platform bridge host
//!
//! The app-blocking stores, the telephone/messaging surfaces and the
//! notification center all live in the platform process that connects to
//! tetherd over IPC. Host calls are turned into events for that bridge.
//! A bridge that connects late reads the current shield sets from
//! `get_state`. Notifications need a subscribed bridge at send time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tether_api::{ChallengeKind, EventPayload, ShieldDomainKind};
use tether_host_api::{DeepLinker, HostError, HostResult, Notifier, ShieldBackend};
use tether_util::AppToken;
use tokio::sync::mpsc;
use tracing::debug;

pub struct BridgeHost {
    tx: mpsc::UnboundedSender<EventPayload>,
    /// Clients currently subscribed to events
    attached: AtomicUsize,
}

impl BridgeHost {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EventPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Self {
            tx,
            attached: AtomicUsize::new(0),
        };
        (Arc::new(host), rx)
    }

    pub fn set_attached(&self, subscribers: usize) {
        let previous = self.attached.swap(subscribers, Ordering::Relaxed);
        if previous != subscribers {
            debug!(subscribers, "Bridge subscribers changed");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Relaxed) > 0
    }

    fn send(&self, payload: EventPayload) -> HostResult<()> {
        self.tx
            .send(payload)
            .map_err(|_| HostError::Internal("bridge channel closed".into()))
    }
}

impl ShieldBackend for BridgeHost {
    fn apply(&self, domain: ShieldDomainKind, apps: &BTreeSet<AppToken>) -> HostResult<()> {
        debug!(domain = %domain, apps = apps.len(), "Forwarding shield store to bridge");
        self.send(EventPayload::ShieldStoreChanged {
            domain,
            apps: apps.iter().cloned().collect(),
        })
    }

    fn clear(&self, domain: ShieldDomainKind) -> HostResult<()> {
        self.send(EventPayload::ShieldStoreChanged {
            domain,
            apps: Vec::new(),
        })
    }

    fn is_healthy(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl DeepLinker for BridgeHost {
    fn open(&self, kind: ChallengeKind, phone: Option<&str>) -> HostResult<()> {
        self.send(EventPayload::DeepLinkRequested {
            kind,
            phone: phone.map(str::to_string),
        })
        .map_err(|e| HostError::DeepLinkFailed(e.to_string()))
    }
}

impl Notifier for BridgeHost {
    fn notify(&self, message: &str) -> HostResult<()> {
        if !self.is_attached() {
            return Err(HostError::NotifyFailed("no bridge attached".into()));
        }
        self.send(EventPayload::NotificationRequested {
            message: message.to_string(),
        })
        .map_err(|e| HostError::NotifyFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_sends_empty_store() {
        let (host, mut rx) = BridgeHost::new();
        let apps: BTreeSet<AppToken> = [AppToken::new("feed")].into_iter().collect();

        host.apply(ShieldDomainKind::WifiGate, &apps).unwrap();
        host.clear(ShieldDomainKind::WifiGate).unwrap();

        match rx.try_recv().unwrap() {
            EventPayload::ShieldStoreChanged { domain, apps } => {
                assert_eq!(domain, ShieldDomainKind::WifiGate);
                assert_eq!(apps, vec![AppToken::new("feed")]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            EventPayload::ShieldStoreChanged { apps, .. } if apps.is_empty()
        ));
    }

    #[test]
    fn notify_needs_an_attached_bridge() {
        let (host, mut rx) = BridgeHost::new();
        assert!(matches!(
            host.notify("Time for a break?"),
            Err(HostError::NotifyFailed(_))
        ));
        assert!(rx.try_recv().is_err());

        host.set_attached(1);
        host.notify("Time for a break?").unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            EventPayload::NotificationRequested { message } if message == "Time for a break?"
        ));

        host.set_attached(0);
        assert!(host.notify("again").is_err());
    }

    #[test]
    fn closed_channel_is_unhealthy() {
        let (host, rx) = BridgeHost::new();
        host.set_attached(1);
        assert!(host.is_healthy());
        drop(rx);

        assert!(!host.is_healthy());
        assert!(matches!(
            host.notify("hello"),
            Err(HostError::NotifyFailed(_))
        ));
        assert!(matches!(
            host.open(ChallengeKind::Call, Some("+15550100")),
            Err(HostError::DeepLinkFailed(_))
        ));
    }
}
