use super::{json_pretty, EXIT_SUCCESS};
use corral_core::CorralConfig;

pub fn run(config: &CorralConfig, json: bool) -> Result<u8, String> {
    if json {
        println!("{}", json_pretty(config)?);
    } else {
        print!("{}", config.to_toml().map_err(|e| e.to_string())?);
    }
    Ok(EXIT_SUCCESS)
}
