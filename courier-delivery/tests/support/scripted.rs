//! Providers that follow a fixed script of outcomes

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use courier_common::{DeliveryOutcome, Message};
use courier_delivery::{Provider, ProviderError};
use parking_lot::Mutex;

/// What a scripted provider does on one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail,
    Panic,
}

/// Provider that plays back `script` one step per call, then repeats `then`
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Step>>,
    then: Step,
    calls: AtomicUsize,
    subjects: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn scripted(
        name: &str,
        script: impl IntoIterator<Item = Step>,
        then: Step,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into_iter().collect()),
            then,
            calls: AtomicUsize::new(0),
            subjects: Mutex::new(Vec::new()),
        })
    }

    pub fn always(name: &str, step: Step) -> Arc<Self> {
        Self::scripted(name, Vec::<Step>::new(), step)
    }

    /// Number of times `send` was called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Subjects of every message this provider was asked to send, in order
    pub fn subjects(&self) -> Vec<String> {
        self.subjects.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<DeliveryOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.subjects.lock().push(message.subject().to_string());

        let step = self.script.lock().pop_front().unwrap_or(self.then);
        match step {
            Step::Succeed => Ok(DeliveryOutcome::success(
                &self.name,
                format!("Sent via {}", self.name),
            )),
            Step::Fail => Err(ProviderError::failed(&self.name, "scripted failure")),
            Step::Panic => panic!("{} exploded", self.name),
        }
    }
}
