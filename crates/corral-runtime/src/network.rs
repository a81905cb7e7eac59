use crate::RuntimeError;

/// Attaches CNI-style network interfaces to a running container's namespace.
///
/// The attach result is opaque to Corral; it is stored verbatim in the
/// sandbox and handed back on reattach.
pub trait NetworkAttacher: Send + Sync {
    fn attach(
        &self,
        namespace: &str,
        sandbox_name: &str,
        container_id: &str,
        pid: i64,
    ) -> Result<String, RuntimeError>;

    fn reattach(
        &self,
        namespace: &str,
        sandbox_name: &str,
        container_id: &str,
        pid: i64,
        stored_result: &str,
    ) -> Result<(), RuntimeError>;
}
