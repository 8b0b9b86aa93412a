//! Test-only scripted LLM client.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::LlmClient;
use crate::error::Result;

type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Scripted client: pops queued results per call, or delegates to a responder
/// closure. Records every prompt it sees. Clones share state.
pub struct MockClient {
    script: Arc<Mutex<VecDeque<Result<String>>>>,
    responder: Option<Arc<Responder>>,
    pub default_response: String,
    /// Milliseconds to sleep before answering.
    pub delay_ms: u64,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            responder: None,
            default_response: "mock summary".into(),
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Clone for MockClient {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            responder: self.responder.clone(),
            default_response: self.default_response.clone(),
            delay_ms: self.delay_ms,
            calls: Arc::clone(&self.calls),
            prompts: Arc::clone(&self.prompts),
        }
    }
}

impl fmt::Debug for MockClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClient")
            .field("scripted", &self.script.lock().unwrap().len())
            .field("responder", &self.responder.is_some())
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl MockClient {
    /// Answer calls in order from `script`, then with the default response.
    #[must_use]
    pub fn with_script(mut self, script: Vec<Result<String>>) -> Self {
        self.script = Arc::new(Mutex::new(script.into()));
        self
    }

    /// Compute every response from the prompt.
    #[must_use]
    pub fn with_responder(
        mut self,
        f: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmClient for MockClient {
    async fn complete(&self, prompt: &str, _max_output_tokens: u32) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if let Some(responder) = &self.responder {
            return responder(prompt);
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(self.default_response.clone()),
        }
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use crate::LlmError;

    use super::*;

    #[tokio::test]
    async fn script_pops_in_order_then_default() {
        let mock = MockClient::default().with_script(vec![
            Ok("first".into()),
            Err(LlmError::Timeout),
        ]);
        assert_eq!(mock.complete("a", 8).await.unwrap(), "first");
        assert!(matches!(
            mock.complete("b", 8).await,
            Err(LlmError::Timeout)
        ));
        assert_eq!(mock.complete("c", 8).await.unwrap(), "mock summary");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn responder_sees_prompt() {
        let mock = MockClient::default().with_responder(|prompt| Ok(format!("echo:{prompt}")));
        assert_eq!(mock.complete("xyz", 8).await.unwrap(), "echo:xyz");
        assert_eq!(mock.prompts(), vec!["xyz".to_owned()]);
    }

    #[tokio::test]
    async fn builders_chain_off_default() {
        let mock = MockClient::default()
            .with_script(vec![Ok("scripted".into())])
            .with_delay(1);
        assert_eq!(mock.complete("p", 8).await.unwrap(), "scripted");

        let mock = MockClient::default().with_responder(|_| Err(LlmError::Timeout));
        assert!(mock.complete("p", 8).await.is_err());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let mock = MockClient::default();
        let clone = mock.clone();
        clone.complete("p", 8).await.unwrap();
        assert_eq!(mock.calls(), 1);
    }
}
