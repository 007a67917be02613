/// Naming helpers for cluster objects

/// Maximum length of a Kubernetes object name (DNS-1123 label)
pub const MAX_NAME_LEN: usize = 63;

/// Object kinds created per instance
pub const WORKLOAD_KIND: &str = "deploy";
pub const EXPOSURE_KIND: &str = "svc";

/// Lowercase and drop everything outside `[a-z0-9-]`
pub fn sanitize_name(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Generate the object name for one of an instance's resources.
/// Only the first segment of the instance id is used, which keeps names short
/// while staying unique for distinct ids with overwhelming probability.
pub fn generate_resource_name(kind: &str, challenge_id: i64, user_id: i64, instance_id: &str) -> String {
    let short_id = instance_id.split('-').next().unwrap_or(instance_id);
    let base = format!("{kind}-chal{challenge_id}-u{user_id}-{short_id}");
    let mut name = sanitize_name(&base);
    name.truncate(MAX_NAME_LEN);
    name.trim_matches('-').to_string()
}

/// In-cluster URL of an instance's exposure
pub fn generate_endpoint(protocol: &str, exposure_name: &str, namespace: &str, port: i32) -> String {
    let proto = protocol.to_lowercase();
    let proto = match proto.as_str() {
        "http" | "https" => proto.as_str(),
        _ => "http",
    };
    format!("{proto}://{exposure_name}.{namespace}:{port}")
}
