//! Pipeline events emitted when a watched branch changes.
//!
//! A repository declares its pipelines as YAML files under `pipelines/`. Each
//! file becomes one [`PipelineEvent`] named after the file, stamped with the
//! remote and branch it came from, and published as JSON for the pipeline
//! runner.
//!
//! # Example
//!
//! `pipelines/build.yaml`:
//!
//! ```yaml
//! steps:
//!   - name: test
//!     tasks:
//!       - name: unit
//!         arguments:
//!           target: all
//! ```
//!
//! becomes
//!
//! ```json
//! {"name":"build","remote":"<remote>","branch":"<branch>",
//!  "steps":[{"name":"test","tasks":[{"name":"unit","arguments":{"target":"all"}}]}]}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Target;

/// Directory, relative to the repository root, holding pipeline definitions.
pub const PIPELINES_DIR: &str = "pipelines";

/// Errors turning a pipeline file into an event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pipeline definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("pipeline file has no usable name: {0}")]
    Unnamed(String),
}

/// A pipeline to run, as sent to the event sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub remote: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A group of tasks the runner may execute concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A single task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// Returns the pipeline name for a definition file: the file name up to its
/// first `.`.
pub fn pipeline_name(path: &Path) -> Option<&str> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name.split('.').next()?;
    if name.is_empty() { None } else { Some(name) }
}

/// Parses a pipeline definition and stamps it with its name and origin.
///
/// Unknown fields are rejected. Any `name`, `remote` or `branch` in the file
/// is overwritten.
pub fn parse_pipeline(
    name: &str,
    target: &Target,
    contents: &str,
) -> Result<PipelineEvent, PipelineError> {
    let mut event: PipelineEvent = serde_yaml::from_str(contents)?;
    event.name = name.to_string();
    event.remote = target.remote.clone();
    event.branch = target.branch.clone();
    Ok(event)
}

/// Reads and parses one pipeline definition file.
pub fn load_pipeline(path: &Path, target: &Target) -> Result<PipelineEvent, PipelineError> {
    let name =
        pipeline_name(path).ok_or_else(|| PipelineError::Unnamed(path.display().to_string()))?;
    let contents = std::fs::read_to_string(path)?;
    parse_pipeline(name, target, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn target() -> Target {
        Target::new("https://example.com/repo.git", "main")
    }

    const BUILD: &str = r#"
steps:
  - name: test
    tasks:
      - name: unit
        arguments:
          target: all
      - name: lint
  - name: package
    tasks:
      - name: tarball
"#;

    #[test]
    fn pipeline_name_strips_every_extension() {
        assert_eq!(pipeline_name(&PathBuf::from("pipelines/build.yaml")), Some("build"));
        assert_eq!(pipeline_name(&PathBuf::from("deploy.prod.yml")), Some("deploy"));
        assert_eq!(pipeline_name(&PathBuf::from("noext")), Some("noext"));
        assert_eq!(pipeline_name(&PathBuf::from(".hidden")), None);
    }

    #[test]
    fn parse_stamps_name_and_target() {
        let event = parse_pipeline("build", &target(), BUILD).unwrap();

        assert_eq!(event.name, "build");
        assert_eq!(event.remote, "https://example.com/repo.git");
        assert_eq!(event.branch, "main");
        assert_eq!(event.steps.len(), 2);
        assert_eq!(event.steps[0].tasks[0].arguments["target"], "all");
        assert!(event.steps[0].tasks[1].arguments.is_empty());
    }

    #[test]
    fn parse_overrides_origin_fields_in_file() {
        let contents = "name: other\nremote: elsewhere\nbranch: dev\nsteps: []\n";
        let event = parse_pipeline("build", &target(), contents).unwrap();

        assert_eq!(event.name, "build");
        assert_eq!(event.branch, "main");
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let contents = "steps:\n  - name: a\n    tasks: []\n    retries: 3\n";
        let result = parse_pipeline("build", &target(), contents);
        assert!(matches!(result, Err(PipelineError::Yaml(_))));
    }

    #[test]
    fn parse_rejects_malformed_yaml() {
        let result = parse_pipeline("build", &target(), "steps: [unterminated");
        assert!(matches!(result, Err(PipelineError::Yaml(_))));
    }

    #[test]
    fn event_serializes_with_lowercase_fields() {
        let event = parse_pipeline("build", &target(), BUILD).unwrap();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["name"], "build");
        assert_eq!(json["remote"], "https://example.com/repo.git");
        assert_eq!(json["branch"], "main");
        assert_eq!(json["steps"][0]["name"], "test");
        assert_eq!(json["steps"][0]["tasks"][0]["name"], "unit");
        assert_eq!(json["steps"][0]["tasks"][0]["arguments"]["target"], "all");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("release.yaml");
        std::fs::write(&path, BUILD).unwrap();

        let event = load_pipeline(&path, &target()).unwrap();
        assert_eq!(event.name, "release");
    }
}
