use super::{json_pretty, EXIT_SUCCESS};
use corral_schema::keys::NAMESPACE_SEPARATOR;
use corral_schema::KeyRegistry;

pub fn run(json: bool) -> Result<u8, String> {
    let registry = KeyRegistry::container();
    if json {
        let prefixes: Vec<_> = registry
            .rules()
            .iter()
            .map(|rule| {
                serde_json::json!({
                    "prefix": format!("{}{NAMESPACE_SEPARATOR}", rule.prefix()),
                    "caller_data": rule.holds_caller_data(),
                })
            })
            .collect();
        let report = serde_json::json!({
            "exact": registry.exact_keys(),
            "prefixes": prefixes,
        });
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("reserved keys:");
    for key in registry.exact_keys() {
        println!("  {key}");
    }
    println!("reserved prefixes:");
    for rule in registry.rules() {
        let owner = if rule.holds_caller_data() {
            "caller data"
        } else {
            "engine owned"
        };
        println!(
            "  {:<20} {owner}",
            format!("{}{NAMESPACE_SEPARATOR}*", rule.prefix())
        );
    }
    Ok(EXIT_SUCCESS)
}
