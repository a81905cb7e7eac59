use super::{json_pretty, read_json, schema_error, EXIT_SUCCESS};
use corral_schema::{decode, ContainerRecord};
use std::fmt::Display;
use std::path::Path;

fn time(t: Option<impl Display>) -> String {
    t.map_or_else(|| "never".to_owned(), |t| t.to_string())
}

pub fn run(path: &Path, id: Option<&str>, json: bool) -> Result<u8, String> {
    let record: ContainerRecord = read_json(path)?;
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
    let name = id
        .map(str::to_owned)
        .or(stem)
        .ok_or_else(|| "invalid input: cannot tell the object name, pass --id".to_owned())?;

    let decoded = decode(&name, &record).map_err(|e| schema_error(&e))?;
    let c = &decoded.container;

    if json {
        let report = serde_json::json!({
            "container": c,
            "state_marker": decoded.state_marker,
            "sandbox_id": decoded.sandbox_id,
        });
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("id:          {name}");
    println!("name:        {}", c.metadata.name);
    println!("attempt:     {}", c.metadata.attempt);
    println!("image:       {}", c.image);
    println!("privileged:  {}", c.privileged);
    println!("created_at:  {}", time(c.created_at));
    println!("started_at:  {}", time(c.started_at));
    println!(
        "marker:      {}",
        decoded.state_marker.as_deref().unwrap_or("(none)")
    );
    println!(
        "sandbox:     {}",
        decoded.sandbox_id.as_deref().unwrap_or("(none)")
    );
    println!("labels:      {}", c.labels.len());
    println!("environment: {}", c.environment.len());
    println!("disks:       {}", c.disks.len());
    println!("nics:        {}", c.nics.len());
    Ok(EXIT_SUCCESS)
}
