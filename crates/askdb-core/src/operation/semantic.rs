//! Semantic operations: render a prompt template, return the completion verbatim.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{
    InvokeError, Operation, OperationContext, OperationInput, OperationKind, OperationMeta,
    OperationRef, ParameterMeta, PromptTemplate,
};
use crate::completion::{truncate_for_log, LlmClient, LlmRequest};

const MAX_PROMPT_LOG_CHARS: usize = 4_000;

/// Per-operation completion settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionSettings {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Operation backed by the text-completion capability
pub struct SemanticOperation {
    meta: OperationMeta,
    template: PromptTemplate,
    settings: CompletionSettings,
    client: Arc<dyn LlmClient>,
}

impl SemanticOperation {
    /// Create a semantic operation. Parameters are inferred from the template's
    /// placeholders; use [`SemanticOperation::with_parameters`] to describe them.
    pub fn new(
        reference: OperationRef,
        description: impl Into<String>,
        template: PromptTemplate,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        let parameters = template
            .variables()
            .into_iter()
            .map(|name| ParameterMeta::required(name, ""))
            .collect();
        let meta = OperationMeta::new(reference, OperationKind::Semantic, description)
            .with_parameters(parameters);
        Self {
            meta,
            template,
            settings: CompletionSettings::default(),
            client,
        }
    }

    /// Replace inferred parameters with declared ones. Template variables that are
    /// not declared are appended as required parameters.
    pub fn with_parameters(mut self, mut parameters: Vec<ParameterMeta>) -> Self {
        for name in self.template.variables() {
            if !parameters.iter().any(|p| p.name == name) {
                parameters.push(ParameterMeta::required(name, ""));
            }
        }
        self.meta.parameters = parameters;
        self
    }

    pub fn with_settings(mut self, settings: CompletionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }
}

#[async_trait]
impl Operation for SemanticOperation {
    fn metadata(&self) -> &OperationMeta {
        &self.meta
    }

    async fn invoke(
        &self,
        input: OperationInput,
        ctx: OperationContext,
    ) -> Result<String, InvokeError> {
        let prompt = self.template.render(&input.values)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                execution_id = %ctx.execution_id,
                step_index = ctx.step_index,
                operation = %self.meta.reference,
                prompt = %truncate_for_log(&prompt, MAX_PROMPT_LOG_CHARS),
                "semantic operation prompt rendered"
            );
        }

        let mut request = LlmRequest::user(prompt)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);
        if let Some(system) = &self.settings.system {
            request = request.with_system(system.clone());
        }
        Ok(self.client.complete(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::LlmError;
    use tokio::sync::Mutex;

    struct RecordingClient {
        requests: Mutex<Vec<LlmRequest>>,
        reply: Result<String, LlmError>,
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
            self.requests.lock().await.push(request);
            self.reply.clone()
        }
    }

    #[tokio::test]
    async fn test_invoke_renders_template_and_returns_raw_completion() {
        let client = Arc::new(RecordingClient {
            requests: Mutex::new(Vec::new()),
            reply: Ok("  SELECT COUNT(*) FROM sales  ".to_string()),
        });
        let operation = SemanticOperation::new(
            OperationRef::new("nlpToSql", "GenerateSql"),
            "Write SQL",
            PromptTemplate::parse("Write SQL for: {{$input}}").expect("template"),
            client.clone(),
        )
        .with_settings(CompletionSettings {
            system: None,
            temperature: Some(0.0),
            max_tokens: Some(256),
        });

        let output = operation
            .invoke(
                OperationInput::new().with_value("input", "count sales"),
                OperationContext::new("exec-1", 0),
            )
            .await
            .expect("invoke");

        assert_eq!(output, "  SELECT COUNT(*) FROM sales  ");
        let requests = client.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user, "Write SQL for: count sales");
        assert_eq!(requests[0].temperature, Some(0.0));
        assert_eq!(requests[0].max_tokens, Some(256));
    }

    #[tokio::test]
    async fn test_invoke_propagates_completion_error() {
        let client = Arc::new(RecordingClient {
            requests: Mutex::new(Vec::new()),
            reply: Err(LlmError::Http("connection reset".to_string())),
        });
        let operation = SemanticOperation::new(
            OperationRef::new("nlpToSql", "GenerateSql"),
            "Write SQL",
            PromptTemplate::parse("{{$input}}").expect("template"),
            client,
        );

        let err = operation
            .invoke(
                OperationInput::new().with_value("input", "x"),
                OperationContext::new("exec-1", 0),
            )
            .await
            .expect_err("provider error");
        assert!(matches!(err, InvokeError::Completion(LlmError::Http(_))));
    }

    #[test]
    fn test_declared_parameters_keep_undeclared_template_variables() {
        let client: Arc<dyn LlmClient> = Arc::new(RecordingClient {
            requests: Mutex::new(Vec::new()),
            reply: Ok(String::new()),
        });
        let operation = SemanticOperation::new(
            OperationRef::new("nlpToSql", "WriteFriendlyResponse"),
            "Summarise rows",
            PromptTemplate::parse("{{$input}} / {{$question}}").expect("template"),
            client,
        )
        .with_parameters(vec![ParameterMeta::optional(
            "question",
            "original question",
            "",
        )]);

        let names: Vec<_> = operation
            .metadata()
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["question", "input"]);
        assert!(!operation.metadata().parameter("question").expect("declared").is_required());
        assert!(operation.metadata().parameter("input").expect("inferred").is_required());
    }
}
