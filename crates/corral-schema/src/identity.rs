use crate::types::ContainerId;
use data_encoding::BASE32_NOPAD;

/// Length of the hash-derived part of a container id.
const ID_HASH_CHARS: usize = 15;

/// Inputs that identify one logical container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTuple<'a> {
    pub owner_tag: &'a str,
    pub container_name: &'a str,
    pub sandbox_name: &'a str,
    pub sandbox_namespace: &'a str,
    pub sandbox_attempt: u32,
    pub sandbox_uid: &'a str,
}

/// Derive the engine object name for a container.
///
/// The six identity fields are joined with `-`, hashed with blake3 and encoded
/// as lowercase base32; the id is the first character of the container name
/// followed by 15 characters of that encoding. This is a naming scheme, not a
/// security boundary. An empty container name yields a bare 15-character id.
pub fn create_id(identity: &IdentityTuple<'_>) -> ContainerId {
    let joined = [
        identity.owner_tag,
        identity.container_name,
        identity.sandbox_name,
        identity.sandbox_namespace,
        &identity.sandbox_attempt.to_string(),
        identity.sandbox_uid,
    ]
    .join("-");

    let digest = blake3::hash(joined.as_bytes());
    let encoded = BASE32_NOPAD.encode(digest.as_bytes()).to_ascii_lowercase();

    let mut id = String::with_capacity(ID_HASH_CHARS + 1);
    if let Some(first) = identity.container_name.chars().next() {
        id.push(first);
    }
    id.push_str(&encoded[..ID_HASH_CHARS]);
    ContainerId::new(id)
}
