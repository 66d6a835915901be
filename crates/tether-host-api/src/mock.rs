//! Mock collaborators for testing

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_api::{ChallengeKind, SceneCategory, ShieldDomainKind};
use tether_util::AppToken;

use crate::{
    ClassifierError, ClassifierResult, DeepLinker, HostError, HostResult, Notifier,
    SceneClassifier, SceneVerdict, ShieldBackend,
};

/// In-memory shield backend with one app set per domain
#[derive(Default)]
pub struct MockShieldBackend {
    stores: Arc<Mutex<HashMap<ShieldDomainKind, BTreeSet<AppToken>>>>,
    apply_calls: Arc<Mutex<u32>>,

    /// Configure apply/clear to fail
    pub fail: Arc<Mutex<bool>>,
}

impl MockShieldBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apps currently blocked by a domain
    pub fn blocked(&self, domain: ShieldDomainKind) -> BTreeSet<AppToken> {
        self.stores
            .lock()
            .unwrap()
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether any domain blocks `app`
    pub fn is_blocked(&self, app: &AppToken) -> bool {
        self.stores
            .lock()
            .unwrap()
            .values()
            .any(|apps| apps.contains(app))
    }

    pub fn apply_calls(&self) -> u32 {
        *self.apply_calls.lock().unwrap()
    }
}

impl ShieldBackend for MockShieldBackend {
    fn apply(&self, domain: ShieldDomainKind, apps: &BTreeSet<AppToken>) -> HostResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(HostError::ShieldUnavailable(domain));
        }
        *self.apply_calls.lock().unwrap() += 1;
        self.stores.lock().unwrap().insert(domain, apps.clone());
        Ok(())
    }

    fn clear(&self, domain: ShieldDomainKind) -> HostResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(HostError::ShieldUnavailable(domain));
        }
        self.stores.lock().unwrap().remove(&domain);
        Ok(())
    }
}

/// Records every deep link opened
#[derive(Default)]
pub struct MockDeepLinker {
    opened: Arc<Mutex<Vec<(ChallengeKind, Option<String>)>>>,
}

impl MockDeepLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<(ChallengeKind, Option<String>)> {
        self.opened.lock().unwrap().clone()
    }
}

impl DeepLinker for MockDeepLinker {
    fn open(&self, kind: ChallengeKind, phone: Option<&str>) -> HostResult<()> {
        self.opened
            .lock()
            .unwrap()
            .push((kind, phone.map(str::to_string)));
        Ok(())
    }
}

/// Records every notification delivered
#[derive(Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    fn notify(&self, message: &str) -> HostResult<()> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// What the mock classifier should answer
#[derive(Debug, Clone)]
pub enum MockVerdict {
    Answer(SceneVerdict),
    Unreachable,
    Unparsable,
}

/// Scriptable classifier
pub struct MockClassifier {
    verdict: Arc<Mutex<MockVerdict>>,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<(usize, SceneCategory)>>>,
}

impl MockClassifier {
    pub fn answering(verified: bool, message: impl Into<String>) -> Self {
        Self::with_verdict(MockVerdict::Answer(SceneVerdict {
            verified,
            message: message.into(),
        }))
    }

    /// Simulates a service that cannot be reached
    pub fn unreachable() -> Self {
        Self::with_verdict(MockVerdict::Unreachable)
    }

    pub fn with_verdict(verdict: MockVerdict) -> Self {
        Self {
            verdict: Arc::new(Mutex::new(verdict)),
            delay: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delay every answer (for timeout tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Image sizes and categories received so far
    pub fn requests(&self) -> Vec<(usize, SceneCategory)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SceneClassifier for MockClassifier {
    async fn classify(
        &self,
        image_jpeg: &[u8],
        scene: SceneCategory,
    ) -> ClassifierResult<SceneVerdict> {
        self.requests
            .lock()
            .unwrap()
            .push((image_jpeg.len(), scene));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let verdict = self.verdict.lock().unwrap().clone();
        match verdict {
            MockVerdict::Answer(v) => Ok(v),
            MockVerdict::Unreachable => {
                Err(ClassifierError::Transport("connection refused".into()))
            }
            MockVerdict::Unparsable => Err(ClassifierError::Parse("not json".into())),
        }
    }
}
