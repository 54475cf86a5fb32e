//! Process Definition Parser
//!
//! Loads and saves process definitions as YAML. Outgoing transition lists
//! are derived from the transition list, so files only need to declare
//! transitions once.

use std::error::Error;
use std::fs;

use log::{debug, info};

use super::model::ProcessDefinition;
use super::validator::validate_definition;

/// Loads a process definition from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Populates each activity's outgoing transitions
/// 3. Validates the definition structure
///
/// # Example
///
/// ```rust,no_run
/// use procvm::process::load_process;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_process("order.yaml")?;
///     println!("Loaded {} activities", definition.activities.len());
///     Ok(())
/// }
/// ```
pub fn load_process(path: &str) -> Result<ProcessDefinition, Box<dyn Error>> {
    info!("Loading process definition from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read process file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_process(&yaml_content)
}

/// Parses and validates a process definition from a YAML string.
pub fn parse_process(yaml_content: &str) -> Result<ProcessDefinition, Box<dyn Error>> {
    let mut definition: ProcessDefinition = serde_yaml::from_str(yaml_content).map_err(|e| {
        format!("Failed to parse process YAML: {}. Check the file format.", e)
    })?;

    info!(
        "Parsed process '{}': {} activities, {} transitions",
        definition.key,
        definition.activities.len(),
        definition.transitions.len()
    );

    validate_definition(&mut definition)?;

    Ok(definition)
}

/// Saves a process definition to a YAML file.
pub fn save_process(definition: &ProcessDefinition, path: &str) -> Result<(), Box<dyn Error>> {
    let yaml_content = serde_yaml::to_string(definition)?;
    fs::write(path, yaml_content)?;
    info!("Process definition saved to: {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::model::{Activity, ActivityBehavior};
    use tempfile::tempdir;

    const FORK_YAML: &str = r#"
key: fork
initial: start
activities:
  - id: start
  - id: left
    behavior:
      type: wait_state
  - id: right
    scope: true
    async_before: true
    job_priority: 5
transitions:
  - id: to_left
    source: start
    target: left
  - id: to_right
    source: start
    target: right
"#;

    #[test]
    fn test_parse_populates_outgoing() {
        let def = parse_process(FORK_YAML).unwrap();
        assert_eq!(def.key, "fork");
        assert_eq!(
            def.outgoing("start"),
            &["to_left".to_string(), "to_right".to_string()]
        );

        let right = def.get_activity("right").unwrap();
        assert!(right.scope);
        assert!(right.async_before);
        assert_eq!(right.job_priority, Some(5));
        assert_eq!(
            def.get_activity("left").unwrap().behavior,
            ActivityBehavior::WaitState
        );
    }

    #[test]
    fn test_parse_rejects_invalid_definition() {
        let yaml = r#"
key: broken
initial: missing
activities:
  - id: start
"#;
        let err = parse_process(yaml).unwrap_err();
        assert!(err.to_string().contains("Initial activity 'missing'"));
    }

    #[test]
    fn test_parse_rejects_unbounded_timer() {
        let yaml = r#"
key: timers
initial: wait
activities:
  - id: wait
    behavior:
      type: timer
      due_in_secs: 9223372036854775807
"#;
        let err = parse_process(yaml).unwrap_err();
        assert!(err.to_string().contains("timer delay above"));
    }

    #[test]
    fn test_load_process_file_not_found() {
        let result = load_process("/nonexistent/path/process.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_process_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "this is not valid yaml: [[[").unwrap();

        let result = load_process(path.to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("saved.yaml");

        let def = ProcessDefinition::new("saved", "a")
            .with_activity(Activity::new("a"))
            .with_activity(Activity::new("b").scope())
            .with_transition("ab", "a", "b");

        save_process(&def, path.to_str().unwrap()).unwrap();
        let loaded = load_process(path.to_str().unwrap()).unwrap();

        assert_eq!(loaded.key, "saved");
        assert!(loaded.is_scope("b"));
        assert_eq!(loaded.outgoing("a"), &["ab".to_string()]);
    }
}
