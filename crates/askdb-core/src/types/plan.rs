//! Plan type definition

use serde::{Deserialize, Serialize};

use super::Step;

/// Ordered steps derived from a goal. Execution order is list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// The natural-language request the plan was created for
    pub goal: String,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            goal: goal.into(),
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Final step with its index.
    pub fn last_step(&self) -> Option<(usize, &Step)> {
        self.steps.iter().enumerate().next_back()
    }

    /// First step whose description satisfies `predicate`, with its index.
    pub fn find_step<P>(&self, predicate: P) -> Option<(usize, &Step)>
    where
        P: Fn(&str) -> bool,
    {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| predicate(&step.description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationRef;

    #[test]
    fn test_find_step_returns_first_match() {
        let plan = Plan::new(
            "count rows",
            vec![
                Step::new("Generate SQL", OperationRef::new("sql", "GenerateSql")),
                Step::new("Write a friendly response", OperationRef::new("sql", "Reply")),
                Step::new("Write a friendly response again", OperationRef::new("sql", "Reply")),
            ],
        );
        let (index, step) = plan
            .find_step(|d| d.starts_with("Write a friendly response"))
            .expect("found");
        assert_eq!(index, 1);
        assert_eq!(step.description, "Write a friendly response");
        assert!(plan.find_step(|d| d.starts_with("Delete")).is_none());
    }

    #[test]
    fn test_last_step_carries_its_index() {
        let plan = Plan::new(
            "count rows",
            vec![
                Step::new("Generate SQL", OperationRef::new("sql", "GenerateSql")),
                Step::new("Run the query", OperationRef::new("db", "RunQuery")),
            ],
        );
        let (index, step) = plan.last_step().expect("last");
        assert_eq!(index, 1);
        assert_eq!(step.description, "Run the query");
        assert!(Plan::new("empty", Vec::new()).last_step().is_none());
    }
}
