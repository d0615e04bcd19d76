use crate::persistence::store::{LoadedRules, RuleStore};
use std::sync::mpsc::{self, Receiver, TryRecvError};

/// One-shot background load of the persisted rule sets.
///
/// Engines stay in their "not loaded" state until the session installs the
/// result; polling never blocks.
pub struct RuleLoad {
    receiver: Option<Receiver<LoadedRules>>,
}

impl RuleLoad {
    pub fn spawn(store: RuleStore) -> Self {
        let (sender, receiver) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("rule-loader".to_string())
            .spawn({
                let store = store.clone();
                let sender = sender.clone();
                move || {
                    let _ = sender.send(store.load_all());
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(
                target: "lootkit::store",
                error = %err,
                "rule loader thread failed, loading inline"
            );
            let _ = sender.send(store.load_all());
        }
        Self {
            receiver: Some(receiver),
        }
    }

    /// Returns the loaded rules exactly once, when ready.
    pub fn poll(&mut self) -> Option<LoadedRules> {
        let receiver = self.receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(loaded) => {
                self.receiver = None;
                Some(loaded)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!(target: "lootkit::store", "rule loader exited without result");
                self.receiver = None;
                Some(LoadedRules::default())
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.receiver.is_some()
    }
}
