use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use std::collections::BTreeMap;

/// ClusterIP service routing `port` to `target_port` on the selected pods
pub fn build_service(
    name: &str,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    port: i32,
    target_port: i32,
    labels: &BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector.clone()),
            ports: Some(vec![ServicePort {
                name: Some(super::deployment::CONTAINER_NAME.to_string()),
                port,
                target_port: Some(IntOrString::Int(target_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
