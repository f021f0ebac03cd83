use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use propwise_core::{ProviderError, ProviderId};

use crate::llm::{ModelProvider, ModelRequest, ModelResponse};
use crate::roles::AgentRole;

/// One canned answer or failure.
#[derive(Clone, Debug)]
pub enum ScriptedOutcome {
    Reply(String),
    Fail(ProviderError),
}

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<ScriptedOutcome>,
    requests: Vec<ModelRequest>,
}

/// Deterministic backend that plays back a queue of outcomes.
///
/// Once the queue is empty the fallback reply (if any) is returned; guard roles get a `PASS`
/// verdict line in front of it. Used for `--dry-run` and tests.
#[derive(Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    fallback_reply: Option<String>,
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: ProviderId::new(id), fallback_reply: None, script: Mutex::new(Script::default()) }
    }

    pub fn with_fallback_reply(mut self, reply: impl Into<String>) -> Self {
        self.fallback_reply = Some(reply.into());
        self
    }

    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.push(ScriptedOutcome::Reply(reply.into()));
        self
    }

    pub fn then_fail(self, error: ProviderError) -> Self {
        self.push(ScriptedOutcome::Fail(error));
        self
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        self.with_script(|script| script.queue.push_back(outcome));
    }

    pub fn calls(&self) -> usize {
        self.with_script(|script| script.requests.len())
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.with_script(|script| script.requests.clone())
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        match self.script.lock() {
            Ok(mut script) => f(&mut script),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn fallback_for(&self, role: AgentRole) -> Option<String> {
        self.fallback_reply.as_ref().map(|reply| {
            if role.answers_with_verdict() {
                format!("PASS\n{reply}")
            } else {
                reply.clone()
            }
        })
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        let next = self.with_script(|script| {
            script.requests.push(request.clone());
            script.queue.pop_front()
        });

        match next {
            Some(ScriptedOutcome::Reply(text)) => {
                Ok(ModelResponse::with_estimated_usage(self.id.clone(), request, text))
            }
            Some(ScriptedOutcome::Fail(error)) => Err(error),
            None => match self.fallback_for(request.role) {
                Some(text) => Ok(ModelResponse::with_estimated_usage(self.id.clone(), request, text)),
                None => Err(ProviderError::fatal(self.id.as_str(), "script exhausted")),
            },
        }
    }
}
