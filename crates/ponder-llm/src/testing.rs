//! Offline models for exercising the reasoning loop.
//!
//! [`ScriptedModel`] replays a fixed queue of responses; [`FnModel`]
//! answers each prompt through a closure; [`StaticProvider`] hands out
//! pre-built models by name.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::{LanguageModel, ModelError, ModelProvider, ModelResult};

/// Model that returns queued responses in order.
pub struct ScriptedModel {
    id: String,
    script: Mutex<VecDeque<ModelResult<String>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// Empty script.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a successful response.
    #[must_use]
    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(text.into()));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn then_err(self, err: ModelError) -> Self {
        self.script.lock().push_back(Err(err));
        self
    }

    /// Response used once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, prompt: &str) -> ModelResult<String> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_owned());
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result,
            None => self.fallback.clone().ok_or_else(|| ModelError::Malformed {
                message: "script exhausted".into(),
            }),
        }
    }
}

type Responder = dyn Fn(&str) -> ModelResult<String> + Send + Sync;

/// Model that answers through a closure, optionally after a delay.
pub struct FnModel {
    id: String,
    respond: Box<Responder>,
    delay: Option<Duration>,
}

impl FnModel {
    /// Wrap a responder closure.
    pub fn new(
        id: impl Into<String>,
        respond: impl Fn(&str) -> ModelResult<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            respond: Box::new(respond),
            delay: None,
        }
    }

    /// Sleep before every response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl LanguageModel for FnModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, prompt: &str) -> ModelResult<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(prompt)
    }
}

/// Provider backed by a fixed name → model table.
#[derive(Default)]
pub struct StaticProvider {
    models: HashMap<String, Arc<dyn LanguageModel>>,
    fallback: Option<Arc<dyn LanguageModel>>,
}

impl StaticProvider {
    /// Provider that returns `model` for every identifier.
    pub fn single(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            models: HashMap::new(),
            fallback: Some(model),
        }
    }

    /// Register a model under its own identifier.
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        let _ = self.models.insert(model.model_id().to_owned(), model);
        self
    }
}

impl ModelProvider for StaticProvider {
    fn model_for(&self, model: &str) -> ModelResult<Arc<dyn LanguageModel>> {
        self.models
            .get(model)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| ModelError::UnknownModel {
                model: model.to_owned(),
            })
    }
}
