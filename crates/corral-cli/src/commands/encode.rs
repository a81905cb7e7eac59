use super::{json_pretty, read_json, schema_error, EXIT_SUCCESS};
use corral_schema::{encode, Container, CREATED_MARKER};
use std::path::Path;

/// Prints the record as `create_container` would first write it.
pub fn run(path: &Path, json: bool) -> Result<u8, String> {
    let container: Container = read_json(path)?;
    let record = encode(&container, Some(CREATED_MARKER)).map_err(|e| schema_error(&e))?;
    if json {
        println!("{}", json_pretty(&record)?);
        return Ok(EXIT_SUCCESS);
    }

    for (key, value) in &record.config {
        println!("{key} = {value}");
    }
    for (name, props) in &record.devices {
        let props: Vec<String> = props.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!("device {name}: {}", props.join(" "));
    }
    if !record.profiles.is_empty() {
        println!("profiles: {}", record.profiles.join(", "));
    }
    Ok(EXIT_SUCCESS)
}
