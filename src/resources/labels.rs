use std::collections::BTreeMap;

pub const MANAGED_LABEL: &str = "ctf.spawner/managed";
pub const USER_LABEL: &str = "ctf.spawner/user-id";
pub const CHALLENGE_LABEL: &str = "ctf.spawner/challenge-id";
pub const INSTANCE_LABEL: &str = "ctf.spawner/instance-id";

/// Generate labels for every object of an instance. They double as the pod
/// selector and let external garbage collection find orphans.
pub fn instance_labels(challenge_id: i64, user_id: i64, instance_id: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/managed-by".to_string(), "challenge-spawner".to_string());
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(USER_LABEL.to_string(), user_id.to_string());
    labels.insert(CHALLENGE_LABEL.to_string(), challenge_id.to_string());
    labels.insert(INSTANCE_LABEL.to_string(), instance_id.to_string());
    labels
}
