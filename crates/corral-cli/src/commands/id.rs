use super::{json_pretty, EXIT_SUCCESS};
use corral_schema::{create_id, IdentityTuple};

pub fn run(
    owner_tag: &str,
    container: &str,
    sandbox: &str,
    namespace: &str,
    attempt: u32,
    uid: &str,
    json: bool,
) -> Result<u8, String> {
    let id = create_id(&IdentityTuple {
        owner_tag,
        container_name: container,
        sandbox_name: sandbox,
        sandbox_namespace: namespace,
        sandbox_attempt: attempt,
        sandbox_uid: uid,
    });
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "id": id }))?);
    } else {
        println!("{id}");
    }
    Ok(EXIT_SUCCESS)
}
