use crate::error::Result;

pub trait LlmClient: Send + Sync {
    /// Produce a completion for `prompt`, bounded by `max_output_tokens`.
    ///
    /// Implementations do not retry; callers own the retry schedule.
    ///
    /// # Errors
    ///
    /// Returns an [`crate::LlmError`] when the service rejects the call or
    /// returns an unusable completion.
    fn complete(
        &self,
        prompt: &str,
        max_output_tokens: u32,
    ) -> impl Future<Output = Result<String>> + Send;

    fn name(&self) -> &str;
}
