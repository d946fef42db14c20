//! Semantic operation loader.
//!
//! Layout on disk:
//!
//! ```text
//! <directory>/<namespace>/<operation>/prompt.txt
//! <directory>/<namespace>/<operation>/config.yaml   (optional)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use askdb_core::completion::LlmClient;
use askdb_core::operation::{
    CompletionSettings, OperationRef, ParameterMeta, PromptTemplate, SemanticOperation,
};

use crate::factory::OperationBuildError;

const PROMPT_FILE: &str = "prompt.txt";
const DESCRIPTOR_FILE: &str = "config.yaml";

/// Contents of an operation's `config.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDescriptor {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completion: DescriptorCompletion,
    #[serde(default)]
    pub parameters: Vec<ParameterMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorCompletion {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl OperationDescriptor {
    fn settings(&self) -> CompletionSettings {
        CompletionSettings {
            system: self.completion.system.clone(),
            temperature: self.completion.temperature,
            max_tokens: self.completion.max_tokens,
        }
    }
}

/// Load every semantic operation below `directory`, sorted by reference.
///
/// `namespace` replaces the directory-derived namespace when given.
pub fn load_semantic_operations(
    directory: &Path,
    namespace: Option<&str>,
    client: Arc<dyn LlmClient>,
) -> Result<Vec<SemanticOperation>, OperationBuildError> {
    let mut operations = Vec::new();
    for namespace_dir in sorted_subdirs(directory)? {
        let dir_namespace = dir_name(&namespace_dir)?;
        for operation_dir in sorted_subdirs(&namespace_dir)? {
            let reference = OperationRef::new(
                namespace.unwrap_or(&dir_namespace),
                dir_name(&operation_dir)?,
            );
            let operation = load_operation(&operation_dir, reference, client.clone())?;
            operations.push(operation);
        }
    }
    tracing::info!(
        directory = %directory.display(),
        count = operations.len(),
        "semantic operations loaded"
    );
    Ok(operations)
}

fn load_operation(
    dir: &Path,
    reference: OperationRef,
    client: Arc<dyn LlmClient>,
) -> Result<SemanticOperation, OperationBuildError> {
    let prompt_path = dir.join(PROMPT_FILE);
    let prompt = fs::read_to_string(&prompt_path).map_err(|source| OperationBuildError::Io {
        path: prompt_path.clone(),
        source,
    })?;
    let template = PromptTemplate::parse(prompt).map_err(|source| OperationBuildError::Template {
        path: prompt_path,
        source,
    })?;

    let descriptor_path = dir.join(DESCRIPTOR_FILE);
    let descriptor = if descriptor_path.is_file() {
        let content =
            fs::read_to_string(&descriptor_path).map_err(|source| OperationBuildError::Io {
                path: descriptor_path.clone(),
                source,
            })?;
        serde_yaml::from_str::<OperationDescriptor>(&content).map_err(|source| {
            OperationBuildError::Parse {
                path: descriptor_path.clone(),
                source,
            }
        })?
    } else {
        OperationDescriptor::default()
    };

    for parameter in &descriptor.parameters {
        if parameter.name.trim().is_empty() {
            return Err(OperationBuildError::InvalidDescriptor {
                operation: reference.to_string(),
                reason: "parameter name must not be empty".to_string(),
            });
        }
    }

    tracing::debug!(
        operation = %reference,
        parameters = descriptor.parameters.len(),
        "semantic operation loaded"
    );
    let settings = descriptor.settings();
    let description = if descriptor.description.trim().is_empty() {
        format!("Semantic operation {}", reference)
    } else {
        descriptor.description.trim().to_string()
    };
    Ok(
        SemanticOperation::new(reference, description, template, client)
            .with_parameters(descriptor.parameters)
            .with_settings(settings),
    )
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, OperationBuildError> {
    let entries = fs::read_dir(dir).map_err(|source| OperationBuildError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| OperationBuildError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> Result<String, OperationBuildError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| OperationBuildError::InvalidDescriptor {
            operation: path.display().to_string(),
            reason: "directory name is not valid UTF-8".to_string(),
        })
}
