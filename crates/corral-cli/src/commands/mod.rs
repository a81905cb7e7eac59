pub mod completions;
pub mod config;
pub mod decode;
pub mod encode;
pub mod id;
pub mod keys;
pub mod replay;
pub mod state;

use corral_schema::ContainerState;
use serde::de::DeserializeOwned;
use std::path::Path;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INPUT_ERROR: u8 = 2;
pub const EXIT_SCHEMA_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Read and parse a JSON input file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content).map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

pub fn schema_error(e: &corral_schema::SchemaError) -> String {
    format!("schema error: {e}")
}

pub fn colorize_state(state: ContainerState) -> String {
    colorize_state_padded(state, 0)
}

/// Style the state label after left-aligning it to `width`, so table columns
/// line up regardless of escape codes.
pub fn colorize_state_padded(state: ContainerState, width: usize) -> String {
    use console::Style;
    let style = match state {
        ContainerState::Created => Style::new().yellow(),
        ContainerState::Running => Style::new().cyan().bold(),
        ContainerState::Exited => Style::new().dim(),
        ContainerState::Unknown => Style::new().red(),
    };
    style
        .apply_to(format!("{:<width$}", state.as_str()))
        .to_string()
}
