use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Result, Subscription};

/// A named external action run when a subscription fires.
///
/// Receives the firing subscription's declaration as its only input.
#[async_trait]
pub trait Playbook: Send + Sync {
    async fn run(&self, subscription: &Subscription) -> Result<()>;
}

/// Playbooks resolved at runtime by name.
#[derive(Clone, Default)]
pub struct PlaybookRegistry {
    playbooks: HashMap<String, Arc<dyn Playbook>>,
}

impl PlaybookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, playbook: Arc<dyn Playbook>) {
        self.playbooks.insert(name.into(), playbook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Playbook>> {
        self.playbooks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.playbooks.contains_key(name)
    }
}
