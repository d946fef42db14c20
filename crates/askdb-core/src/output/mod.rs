//! Output formatting
//!
//! Picks the answer out of an executed plan and renders a markdown trace of
//! how it was produced. Step outputs may carry a marker (default `Message ->`)
//! separating discardable reasoning from the payload; only the payload is kept.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::{StepOutcome, StepState};
use crate::types::{ExecutionContext, Plan, Step};

pub const DEFAULT_MARKER: &str = "Message ->";
pub const DEFAULT_ANSWER_STEP_PREFIX: &str = "Write a friendly response";

/// Output extraction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("plan has no steps")]
    EmptyPlan,

    #[error("no step matches {0}")]
    StepNotFound(String),

    #[error("step {step_index} declares no output key")]
    NoOutputKey { step_index: usize },

    #[error("context has no value for '{key}' (output of step {step_index})")]
    MissingValue { step_index: usize, key: String },
}

/// Which step's output is the answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// First step whose description starts with the configured prefix
    #[default]
    NamedStep,
    /// Output of the last step
    FinalStep,
}

/// Keep only the text after the last `marker`, trimmed. Text without the
/// marker (or an empty marker) is returned unchanged.
pub fn strip_marker(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    match text.rfind(marker) {
        Some(pos) => text[pos + marker.len()..].trim().to_string(),
        None => text.to_string(),
    }
}

/// Predicate matching step descriptions that start with `prefix`.
pub fn description_starts_with(prefix: impl Into<String>) -> impl Fn(&str) -> bool {
    let prefix = prefix.into();
    move |description: &str| description.trim_start().starts_with(prefix.as_str())
}

/// Answer extraction and trace rendering
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    marker: String,
    answer_mode: AnswerMode,
    answer_step_prefix: String,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
            answer_mode: AnswerMode::default(),
            answer_step_prefix: DEFAULT_ANSWER_STEP_PREFIX.to_string(),
        }
    }
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_answer_mode(mut self, mode: AnswerMode) -> Self {
        self.answer_mode = mode;
        self
    }

    pub fn with_answer_step_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.answer_step_prefix = prefix.into();
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn strip(&self, text: &str) -> String {
        strip_marker(text, &self.marker)
    }

    /// Value bound to the last step's output key, marker stripped.
    pub fn extract_final(
        &self,
        plan: &Plan,
        context: &ExecutionContext,
    ) -> Result<String, OutputError> {
        let (step_index, step) = plan.last_step().ok_or(OutputError::EmptyPlan)?;
        let raw = step_output(step_index, step, context)?;
        Ok(self.strip(raw))
    }

    /// Output of the first step whose description satisfies `predicate`,
    /// marker stripped.
    pub fn extract_named_step<P>(
        &self,
        plan: &Plan,
        context: &ExecutionContext,
        predicate: P,
    ) -> Result<String, OutputError>
    where
        P: Fn(&str) -> bool,
    {
        let (step_index, step) = plan
            .find_step(predicate)
            .ok_or_else(|| OutputError::StepNotFound("the description predicate".to_string()))?;
        let raw = step_output(step_index, step, context)?;
        Ok(self.strip(raw))
    }

    /// The answer according to the configured [`AnswerMode`].
    pub fn answer(&self, plan: &Plan, context: &ExecutionContext) -> Result<String, OutputError> {
        match self.answer_mode {
            AnswerMode::FinalStep => self.extract_final(plan, context),
            AnswerMode::NamedStep => self
                .extract_named_step(
                    plan,
                    context,
                    description_starts_with(self.answer_step_prefix.as_str()),
                )
                .map_err(|err| match err {
                    OutputError::StepNotFound(_) => OutputError::StepNotFound(format!(
                        "description prefix '{}'",
                        self.answer_step_prefix
                    )),
                    other => other,
                }),
        }
    }

    /// Per-step markdown blocks: index, description, operation and output.
    pub fn render_trace(
        &self,
        plan: &Plan,
        context: &ExecutionContext,
        outcomes: &[StepOutcome],
    ) -> String {
        let mut trace = String::new();
        for (index, step) in plan.steps.iter().enumerate() {
            let outcome = outcomes.iter().find(|o| o.step_index == index);
            let _ = write!(
                trace,
                "**Step {}:**\n- **Description:** {}\n- **Function:** {}\n",
                index, step.description, step.operation
            );
            match outcome.map(|o| o.state) {
                Some(StepState::Failed) => {
                    let error = outcome
                        .and_then(|o| o.error.as_deref())
                        .unwrap_or("unknown error");
                    let _ = writeln!(trace, "- **Status:** failed: {}", error);
                }
                Some(StepState::Pending) | Some(StepState::Running) => {
                    let _ = writeln!(trace, "- **Status:** not run");
                }
                Some(StepState::Succeeded) | None => {}
            }

            let output = step
                .primary_output()
                .and_then(|key| context.get(key))
                .or_else(|| outcome.and_then(|o| o.output.as_deref()));
            if let Some(output) = output {
                let text = self.strip(output).replace('\n', "\n  ");
                let _ = write!(trace, "  - **Output:**\n```\n{}\n```\n\n", text);
            }
        }
        trace
    }

    /// Full report: the user's question, the answer, then the step trace.
    pub fn render_report(
        &self,
        user_input: &str,
        answer: &str,
        plan: &Plan,
        context: &ExecutionContext,
        outcomes: &[StepOutcome],
    ) -> String {
        format!(
            "**User ASK:** {}\n\n**Response:** {}\n\n{}",
            user_input,
            answer,
            self.render_trace(plan, context, outcomes)
        )
    }
}

fn step_output<'a>(
    step_index: usize,
    step: &Step,
    context: &'a ExecutionContext,
) -> Result<&'a str, OutputError> {
    let key = step
        .primary_output()
        .ok_or(OutputError::NoOutputKey { step_index })?;
    context.get(key).ok_or_else(|| OutputError::MissingValue {
        step_index,
        key: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationRef;
    use crate::types::{InputBinding, GOAL_KEY};

    fn plan() -> Plan {
        Plan::new(
            "count rows",
            vec![
                Step::new("Generate SQL", OperationRef::new("nlpToSql", "GenerateSql"))
                    .with_input("input", InputBinding::variable(GOAL_KEY))
                    .with_output("sql_text"),
                Step::new("Run the query", OperationRef::new("QueryDb", "RunQuery"))
                    .with_input("input", InputBinding::variable("sql_text"))
                    .with_output("rows"),
                Step::new(
                    "Write a friendly response from the rows",
                    OperationRef::new("nlpToSql", "WriteFriendlyResponse"),
                )
                .with_input("input", InputBinding::variable("rows"))
                .with_output("answer"),
            ],
        )
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("count rows")
            .with_seed("sql_text", "SELECT COUNT(*)\nFROM products")
            .with_seed("rows", "count\n2")
            .with_seed("answer", "preamble ignored. Message -> Final answer text  ")
    }

    fn outcome(step_index: usize, step: &Step, state: StepState) -> StepOutcome {
        StepOutcome {
            step_index,
            description: step.description.clone(),
            operation: step.operation.clone(),
            state,
            output: None,
            error: None,
            elapsed_ms: None,
        }
    }

    #[test]
    fn test_strip_marker_keeps_trimmed_payload() {
        assert_eq!(
            strip_marker("preamble ignored. Message -> Final answer text", DEFAULT_MARKER),
            "Final answer text"
        );
        assert_eq!(strip_marker("  no marker here ", DEFAULT_MARKER), "  no marker here ");
        assert_eq!(strip_marker("x Message -> a Message -> b", DEFAULT_MARKER), "b");
        assert_eq!(strip_marker("anything", ""), "anything");
    }

    #[test]
    fn test_strip_marker_is_idempotent() {
        let inputs = [
            "",
            "Message ->",
            "Message ->Message ->",
            "a Message -> b Message -> c",
            "   Message ->   spaced   ",
            "Message - > near miss",
            "plain text\nwith lines",
        ];
        for input in inputs {
            let once = strip_marker(input, DEFAULT_MARKER);
            assert_eq!(strip_marker(&once, DEFAULT_MARKER), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_extract_named_step_strips_preamble() {
        let answer = OutputFormatter::new()
            .extract_named_step(
                &plan(),
                &context(),
                description_starts_with(DEFAULT_ANSWER_STEP_PREFIX),
            )
            .expect("named step");
        assert_eq!(answer, "Final answer text");
    }

    #[test]
    fn test_extract_named_step_surfaces_missing_step() {
        let err = OutputFormatter::new()
            .extract_named_step(&plan(), &context(), description_starts_with("Summarise"))
            .expect_err("no match");
        assert!(matches!(err, OutputError::StepNotFound(_)));
    }

    #[test]
    fn test_extract_final_reads_last_step_output() {
        let formatter = OutputFormatter::new();
        assert_eq!(
            formatter.extract_final(&plan(), &context()).expect("final"),
            "Final answer text"
        );

        let mut two_steps = plan();
        two_steps.steps.pop();
        assert_eq!(
            formatter.extract_final(&two_steps, &context()).expect("final"),
            "count\n2"
        );

        let halted = ExecutionContext::new("count rows").with_seed("sql_text", "SELECT 1");
        assert_eq!(
            formatter.extract_final(&two_steps, &halted),
            Err(OutputError::MissingValue {
                step_index: 1,
                key: "rows".to_string()
            })
        );
    }

    #[test]
    fn test_answer_mode_selects_extraction() {
        let mut plan = plan();
        plan.steps[2].description = "Summarise the rows".to_string();

        let named = OutputFormatter::new();
        assert!(matches!(
            named.answer(&plan, &context()),
            Err(OutputError::StepNotFound(msg)) if msg.contains("Write a friendly response")
        ));

        let final_step = OutputFormatter::new().with_answer_mode(AnswerMode::FinalStep);
        assert_eq!(
            final_step.answer(&plan, &context()).expect("final"),
            "Final answer text"
        );
    }

    #[test]
    fn test_render_report_matches_markdown_layout() {
        let plan = plan();
        let outcomes: Vec<_> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| outcome(i, s, StepState::Succeeded))
            .collect();
        let report = OutputFormatter::new().render_report(
            "how many products?",
            "Final answer text",
            &plan,
            &context(),
            &outcomes,
        );

        let expected = concat!(
            "**User ASK:** how many products?\n\n",
            "**Response:** Final answer text\n\n",
            "**Step 0:**\n- **Description:** Generate SQL\n- **Function:** nlpToSql.GenerateSql\n",
            "  - **Output:**\n```\nSELECT COUNT(*)\n  FROM products\n```\n\n",
            "**Step 1:**\n- **Description:** Run the query\n- **Function:** QueryDb.RunQuery\n",
            "  - **Output:**\n```\ncount\n  2\n```\n\n",
            "**Step 2:**\n- **Description:** Write a friendly response from the rows\n",
            "- **Function:** nlpToSql.WriteFriendlyResponse\n",
            "  - **Output:**\n```\nFinal answer text\n```\n\n",
        );
        assert_eq!(report, expected);
    }

    #[test]
    fn test_render_trace_marks_failed_and_unreached_steps() {
        let plan = plan();
        let ctx = ExecutionContext::new("count rows").with_seed("sql_text", "SELECT 1");
        let mut failed = outcome(1, &plan.steps[1], StepState::Failed);
        failed.error = Some("connection refused".to_string());
        let outcomes = vec![
            outcome(0, &plan.steps[0], StepState::Succeeded),
            failed,
            outcome(2, &plan.steps[2], StepState::Pending),
        ];

        let trace = OutputFormatter::new().render_trace(&plan, &ctx, &outcomes);
        assert!(trace.contains("```\nSELECT 1\n```"));
        assert!(trace.contains("- **Status:** failed: connection refused\n"));
        assert!(trace.contains("- **Status:** not run\n"));
        assert_eq!(trace.matches("**Output:**").count(), 1);
    }
}
