use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use corral_schema::{derive_state, EngineStatus};

pub fn run(code: u16, marker: Option<&str>, json: bool) -> Result<u8, String> {
    let status = EngineStatus::from_code(code);
    let state = derive_state(status, marker);
    if json {
        let report = serde_json::json!({
            "status_code": code,
            "status": status,
            "marker": marker,
            "state": state,
        });
        println!("{}", json_pretty(&report)?);
    } else {
        println!("{}", colorize_state(state));
    }
    Ok(EXIT_SUCCESS)
}
