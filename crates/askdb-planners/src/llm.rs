use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use askdb_core::completion::{truncate_for_log, LlmClient, LlmRequest};
use askdb_core::normalizer::PlanNormalizer;
use askdb_core::operation::{OperationMeta, OperationRef};
use askdb_core::output::DEFAULT_ANSWER_STEP_PREFIX;
use askdb_core::planner::{PlanError, Planner};
use askdb_core::registry::OperationRegistry;
use askdb_core::types::{InputBinding, Plan, Step, GOAL_KEY};

const MAX_PROMPT_LOG_CHARS: usize = 4_000;
const MAX_LLM_OUTPUT_LOG_CHARS: usize = 8_000;

/// Planner config for LLM
#[derive(Debug, Clone)]
pub struct LlmPlannerConfig {
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Upper bound on the single completion call.
    pub timeout: Duration,
    /// Appended to the planning rules.
    pub extra_instructions: Option<String>,
    /// Context keys present before step 0 besides `goal`.
    pub seed_keys: Vec<String>,
    /// Description prefix the answer-writing step must carry.
    pub answer_step_prefix: Option<String>,
}

impl Default for LlmPlannerConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a planner. You break a goal into an ordered list of steps, \
                            each calling one available function. Return ONLY valid JSON for the plan."
                .to_string(),
            temperature: Some(0.0),
            max_tokens: Some(1024),
            timeout: Duration::from_secs(60),
            extra_instructions: None,
            seed_keys: Vec::new(),
            answer_step_prefix: Some(DEFAULT_ANSWER_STEP_PREFIX.to_string()),
        }
    }
}

/// LLM-based planner
pub struct LlmPlanner<C: LlmClient> {
    pub client: C,
    pub config: LlmPlannerConfig,
    normalizer: PlanNormalizer,
}

impl<C: LlmClient> LlmPlanner<C> {
    pub fn new(client: C, config: LlmPlannerConfig) -> Self {
        Self {
            client,
            config,
            normalizer: PlanNormalizer::new(),
        }
    }

    /// Replace the default normalizer (e.g. to add validators).
    pub fn with_normalizer(mut self, normalizer: PlanNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    fn seed_keys(&self) -> Vec<String> {
        let mut keys = vec![GOAL_KEY.to_string()];
        keys.extend(self.config.seed_keys.iter().cloned());
        keys
    }

    fn build_prompt(&self, goal: &str, registry: &OperationRegistry) -> (String, String) {
        let system = build_system_prompt(
            &self.config.system_prompt,
            self.config.extra_instructions.as_deref(),
            self.config.answer_step_prefix.as_deref(),
            &registry.catalog(),
            &self.seed_keys(),
        );

        let mut user = String::new();
        let _ = write!(user, "Goal:\n{}\n\n", goal.trim());
        user.push_str("Return a JSON object with shape:\n");
        user.push_str(
            r#"{"steps":[{"description":"...","operation":"namespace.name","inputs":{"parameter":"$variable"},"outputs":["variable"]}]}"#,
        );
        user.push_str(
            "\nUse only functions listed in the system prompt Function Catalog. Return JSON only.\n",
        );
        (system, user)
    }
}

fn build_system_prompt(
    base: &str,
    extra_instructions: Option<&str>,
    answer_step_prefix: Option<&str>,
    catalog: &[OperationMeta],
    seed_keys: &[String],
) -> String {
    let mut system = String::new();
    system.push_str(base.trim());
    system.push_str("\n\nPlanning Rules:\n");
    system.push_str("1) Return ONLY one valid JSON object matching the required plan shape.\n");
    system.push_str("2) Steps run strictly in list order, one at a time.\n");
    system.push_str("3) `operation` is the fully-qualified function name `namespace.name`.\n");
    system.push_str(
        "4) Each `inputs` value is either `$variable` (read a variable) or literal text.\n",
    );
    system.push_str(
        "5) A step may only read variables listed under Available Variables or written by an earlier step's `outputs`.\n",
    );
    system.push_str("6) Bind every required parameter. Do not invent parameter names.\n");
    system.push_str("7) Do not invent function names not listed in Function Catalog.\n");
    match answer_step_prefix.map(str::trim).filter(|s| !s.is_empty()) {
        Some(prefix) => {
            let _ = writeln!(
                system,
                "8) Give each step a short `description`; the step that writes the final answer for the user should start with \"{}\".",
                prefix
            );
        }
        None => system.push_str("8) Give each step a short `description`.\n"),
    }
    if let Some(extra) = extra_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        let _ = writeln!(system, "9) {}", extra);
    }

    system.push_str("\nAvailable Variables:\n");
    for key in seed_keys {
        let _ = writeln!(system, "- ${}", key);
    }

    system.push_str("\nFunction Catalog:\n");
    for meta in catalog {
        append_catalog_entry(&mut system, meta);
    }
    system
}

fn append_catalog_entry(buf: &mut String, meta: &OperationMeta) {
    let _ = writeln!(buf, "- name: {}", meta.reference);
    let _ = writeln!(buf, "  kind: {}", meta.kind);
    let _ = writeln!(buf, "  description: {}", meta.description);
    if meta.parameters.is_empty() {
        let _ = writeln!(buf, "  parameters: []");
        return;
    }
    let _ = writeln!(buf, "  parameters:");
    for parameter in &meta.parameters {
        let requirement = match &parameter.default {
            None => "required".to_string(),
            Some(default) => format!("optional, default={:?}", default),
        };
        if parameter.description.is_empty() {
            let _ = writeln!(buf, "    - {} ({})", parameter.name, requirement);
        } else {
            let _ = writeln!(
                buf,
                "    - {} ({}): {}",
                parameter.name, requirement, parameter.description
            );
        }
    }
}

/// Plan shape requested from the model.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanDocument {
    steps: Vec<StepDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDocument {
    description: String,
    operation: String,
    #[serde(default)]
    inputs: BTreeMap<String, String>,
    #[serde(default)]
    outputs: Vec<String>,
}

fn decode_plan(goal: &str, json: &str) -> Result<Plan, PlanError> {
    let document: PlanDocument = serde_json::from_str(json)
        .map_err(|e| PlanError::Parse(format!("Invalid plan JSON: {}", e)))?;

    let mut steps = Vec::with_capacity(document.steps.len());
    for (index, doc) in document.steps.into_iter().enumerate() {
        let operation = OperationRef::parse(&doc.operation).ok_or_else(|| {
            PlanError::Parse(format!(
                "step {}: operation '{}' is not of the form namespace.name",
                index, doc.operation
            ))
        })?;
        let mut step = Step::new(doc.description, operation);
        for (parameter, raw) in doc.inputs {
            step = step.with_input(parameter, InputBinding::parse(&raw));
        }
        for key in doc.outputs {
            step = step.with_output(key);
        }
        steps.push(step);
    }
    Ok(Plan::new(goal, steps))
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

#[async_trait]
impl<C: LlmClient> Planner for LlmPlanner<C> {
    async fn create_plan(
        &self,
        goal: &str,
        registry: &OperationRegistry,
    ) -> Result<Plan, PlanError> {
        if goal.trim().is_empty() {
            return Err(PlanError::EmptyGoal);
        }

        let (system, user) = self.build_prompt(goal, registry);
        info!(
            temperature = ?self.config.temperature,
            goal_len = goal.len(),
            operation_count = registry.len(),
            "planner request prepared"
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                system_prompt = %truncate_for_log(&system, MAX_PROMPT_LOG_CHARS),
                user_prompt = %truncate_for_log(&user, MAX_PROMPT_LOG_CHARS),
                "planner prompts"
            );
        }

        let request = LlmRequest::user(user)
            .with_system(system)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        let output = tokio::time::timeout(self.config.timeout, self.client.complete(request))
            .await
            .map_err(|_| PlanError::Timeout(self.config.timeout))??;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                llm_output = %truncate_for_log(&output, MAX_LLM_OUTPUT_LOG_CHARS),
                "planner raw llm output"
            );
        }

        let json = extract_json(&output)
            .ok_or_else(|| PlanError::Parse("LLM output did not contain JSON".to_string()))?;
        let plan = decode_plan(goal, json)?;
        let plan = self
            .normalizer
            .normalize(plan, registry, &self.seed_keys())?;

        info!(step_count = plan.steps.len(), "planner parsed plan");
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                plan = %truncate_for_log(&format!("{:?}", plan.steps), MAX_LLM_OUTPUT_LOG_CHARS),
                "planner plan detail"
            );
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockLlmClient, ScriptedLlmClient};
    use askdb_core::completion::LlmError;
    use askdb_core::normalizer::ValidationError;
    use askdb_core::operation::{
        InvokeError, NativeOperation, Operation, OperationInput, ParameterMeta,
    };
    use std::sync::Arc;

    fn op(namespace: &str, name: &str, parameters: Vec<ParameterMeta>) -> Arc<dyn Operation> {
        Arc::new(NativeOperation::from_fn(
            OperationRef::new(namespace, name),
            format!("{} operation", name),
            parameters,
            |_input: OperationInput| async { Ok::<_, InvokeError>(String::new()) },
        ))
    }

    fn registry() -> OperationRegistry {
        let mut registry = OperationRegistry::new();
        for operation in [
            op(
                "sql",
                "GenerateSql",
                vec![ParameterMeta::required("input", "the request")],
            ),
            op(
                "db",
                "RunQuery",
                vec![
                    ParameterMeta::required("input", "SQL text"),
                    ParameterMeta::optional("limit", "row cap", "100"),
                ],
            ),
        ] {
            registry.register(operation).expect("register");
        }
        registry
    }

    const VALID_PLAN: &str = r#"Here is the plan:
```json
{"steps":[
  {"description":"Generate SQL","operation":"sql.GenerateSql","inputs":{"input":"$goal"},"outputs":["sql_text"]},
  {"description":"Run the query","operation":"db.RunQuery","inputs":{"input":"$sql_text"},"outputs":["$result"]}
]}
```"#;

    fn planner(response: &str) -> LlmPlanner<MockLlmClient> {
        LlmPlanner::new(MockLlmClient::new(response), LlmPlannerConfig::default())
    }

    #[tokio::test]
    async fn test_create_plan_decodes_bindings_and_normalizes_outputs() {
        let plan = planner(VALID_PLAN)
            .create_plan("count rows", &registry())
            .await
            .expect("plan");

        assert_eq!(plan.goal, "count rows");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].operation, OperationRef::new("sql", "GenerateSql"));
        assert_eq!(
            plan.steps[0].input_bindings.get("input"),
            Some(&InputBinding::variable(GOAL_KEY))
        );
        assert_eq!(plan.steps[0].output_keys, vec!["sql_text"]);
        assert_eq!(plan.steps[1].output_keys, vec!["result"]);
    }

    #[tokio::test]
    async fn test_malformed_response_is_a_parse_error() {
        let err = planner("I would first generate SQL, then run it.")
            .create_plan("count rows", &registry())
            .await
            .expect_err("no json");
        assert!(matches!(err, PlanError::Parse(_)));

        let err = planner(r#"{"steps": [{"description": "x", "operation": }]}"#)
            .create_plan("count rows", &registry())
            .await
            .expect_err("broken json");
        assert!(matches!(err, PlanError::Parse(msg) if msg.contains("Invalid plan JSON")));
    }

    #[tokio::test]
    async fn test_unknown_fields_and_unqualified_operations_are_rejected() {
        let extra = r#"{"steps":[{"description":"x","operation":"sql.GenerateSql","inputs":{"input":"$goal"},"retries":3}]}"#;
        assert!(matches!(
            planner(extra).create_plan("count rows", &registry()).await,
            Err(PlanError::Parse(_))
        ));

        let bare = r#"{"steps":[{"description":"x","operation":"GenerateSql","inputs":{"input":"$goal"}}]}"#;
        assert!(matches!(
            planner(bare).create_plan("count rows", &registry()).await,
            Err(PlanError::Parse(msg)) if msg.contains("namespace.name")
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_bindings_are_rejected_before_execution() {
        let response = r#"{"steps":[
          {"description":"Run the query","operation":"db.RunQuery","inputs":{"input":"$sql_text"},"outputs":["result"]},
          {"description":"Generate SQL","operation":"sql.GenerateSql","inputs":{"input":"$goal"},"outputs":["sql_text"]}
        ]}"#;
        let err = planner(response)
            .create_plan("count rows", &registry())
            .await
            .expect_err("invalid");
        assert!(matches!(
            err,
            PlanError::Invalid(ValidationError::UnresolvedVariable { step_index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_invalid() {
        let response = r#"{"steps":[{"description":"Drop","operation":"db.DropTable","inputs":{},"outputs":[]}]}"#;
        assert!(matches!(
            planner(response).create_plan("count rows", &registry()).await,
            Err(PlanError::Invalid(ValidationError::UnknownOperation { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_goal_never_calls_the_client() {
        let planner = LlmPlanner::new(ScriptedLlmClient::new(), LlmPlannerConfig::default());
        assert!(matches!(
            planner.create_plan("   ", &registry()).await,
            Err(PlanError::EmptyGoal)
        ));
        assert!(planner.client.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_and_timeout_surface_as_plan_errors() {
        let failing = LlmPlanner::new(
            ScriptedLlmClient::new().with_error(LlmError::Http("unreachable".to_string())),
            LlmPlannerConfig::default(),
        );
        assert!(matches!(
            failing.create_plan("count rows", &registry()).await,
            Err(PlanError::Completion(LlmError::Http(_)))
        ));

        struct SlowClient;
        #[async_trait]
        impl LlmClient for SlowClient {
            async fn complete(&self, _request: LlmRequest) -> Result<String, LlmError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(VALID_PLAN.to_string())
            }
        }
        let slow = LlmPlanner::new(
            SlowClient,
            LlmPlannerConfig {
                timeout: Duration::from_millis(20),
                ..LlmPlannerConfig::default()
            },
        );
        assert!(matches!(
            slow.create_plan("count rows", &registry()).await,
            Err(PlanError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_prompt_carries_catalog_variables_and_goal() {
        let planner = LlmPlanner::new(
            ScriptedLlmClient::new().with_response(VALID_PLAN),
            LlmPlannerConfig {
                seed_keys: vec!["dialect".to_string()],
                extra_instructions: Some("Prefer PostgreSQL syntax.".to_string()),
                answer_step_prefix: Some("Compose the reply".to_string()),
                ..LlmPlannerConfig::default()
            },
        );
        planner
            .create_plan("count rows", &registry())
            .await
            .expect("plan");

        let requests = planner.client.requests().await;
        assert_eq!(requests.len(), 1);
        let system = &requests[0].system;
        assert!(system.contains("Function Catalog"));
        assert!(system.contains("- name: db.RunQuery"));
        assert!(system.contains("input (required): SQL text"));
        assert!(system.contains("limit (optional, default=\"100\"): row cap"));
        assert!(system.contains("- $goal\n- $dialect\n"));
        assert!(system.contains("9) Prefer PostgreSQL syntax."));
        assert!(system.contains("should start with \"Compose the reply\"."));
        assert!(!system.contains("Write a friendly response"));
        assert!(requests[0].user.contains("Goal:\ncount rows"));
        assert_eq!(requests[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_answer_step_rule_follows_prefix_setting() {
        let default_planner = LlmPlanner::new(
            ScriptedLlmClient::new().with_response(VALID_PLAN),
            LlmPlannerConfig::default(),
        );
        default_planner
            .create_plan("count rows", &registry())
            .await
            .expect("plan");
        let system = default_planner.client.requests().await[0].system.clone();
        assert!(system.contains("should start with \"Write a friendly response\"."));

        let unnamed = LlmPlanner::new(
            ScriptedLlmClient::new().with_response(VALID_PLAN),
            LlmPlannerConfig {
                answer_step_prefix: None,
                ..LlmPlannerConfig::default()
            },
        );
        unnamed
            .create_plan("count rows", &registry())
            .await
            .expect("plan");
        let system = unnamed.client.requests().await[0].system.clone();
        assert!(system.contains("8) Give each step a short `description`.\n"));
        assert!(!system.contains("should start with"));
    }
}
