use super::{
    ClaimTemplate, ContainerSpec, Mount, PodVolume, Resource, ResourceKind, ResourceSpec,
    RouteSpec, ServiceSpec, VolumeSpec, WorkloadSpec,
};
use crate::model::Healthcheck;
use serde_json::{json, Map, Value};

pub(super) fn manifest(resource: &Resource) -> Value {
    let spec = match &resource.spec {
        ResourceSpec::Workload(w) => workload(resource.kind, w),
        ResourceSpec::Service(s) => service(s),
        ResourceSpec::Volume(v) => volume(v),
        ResourceSpec::Route(r) if resource.kind == ResourceKind::HttpRoute => http_route(r),
        ResourceSpec::Route(r) => ingress(r),
    };

    json!({
        "apiVersion": resource.kind.api_version(),
        "kind": resource.kind.as_str(),
        "metadata": {
            "name": resource.metadata.name,
            "namespace": resource.metadata.namespace,
            "labels": resource.metadata.labels,
            "annotations": resource.metadata.annotations,
        },
        "spec": spec,
    })
}

fn workload(kind: ResourceKind, spec: &WorkloadSpec) -> Value {
    let mut pod_spec = Map::new();
    pod_spec.insert("containers".into(), json!([container(&spec.container)]));
    if !spec.volumes.is_empty() {
        pod_spec.insert(
            "volumes".into(),
            Value::Array(spec.volumes.iter().map(pod_volume).collect()),
        );
    }
    if let Some(policy) = &spec.restart_policy {
        pod_spec.insert("restartPolicy".into(), json!(policy));
    }

    let template = json!({
        "metadata": {
            "labels": spec.pod_labels,
            "annotations": spec.pod_annotations,
        },
        "spec": pod_spec,
    });

    match kind {
        ResourceKind::Job => json!({
            "completions": spec.replicas,
            "parallelism": spec.replicas,
            "backoffLimit": 0,
            "template": template,
        }),
        ResourceKind::StatefulSet => json!({
            "replicas": spec.replicas,
            "serviceName": spec.service_name,
            "selector": { "matchLabels": spec.selector },
            "template": template,
            "volumeClaimTemplates": spec.claim_templates.iter().map(claim_template).collect::<Vec<_>>(),
        }),
        _ => json!({
            "replicas": spec.replicas,
            "selector": { "matchLabels": spec.selector },
            "template": template,
        }),
    }
}

fn container(spec: &ContainerSpec) -> Value {
    let mut c = Map::new();
    c.insert("name".into(), json!(spec.name));
    c.insert("image".into(), json!(spec.image));
    if !spec.command.is_empty() {
        c.insert("command".into(), json!(spec.command));
    }
    if !spec.args.is_empty() {
        c.insert("args".into(), json!(spec.args));
    }
    if !spec.env.is_empty() {
        let env: Vec<Value> = spec
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        c.insert("env".into(), Value::Array(env));
    }
    if !spec.ports.is_empty() {
        let ports: Vec<Value> = spec
            .ports
            .iter()
            .map(|p| json!({ "containerPort": p.port, "protocol": p.protocol.as_str() }))
            .collect();
        c.insert("ports".into(), Value::Array(ports));
    }
    if !spec.mounts.is_empty() {
        c.insert(
            "volumeMounts".into(),
            Value::Array(spec.mounts.iter().map(mount).collect()),
        );
    }
    if let Some(dir) = &spec.working_dir {
        c.insert("workingDir".into(), json!(dir));
    }
    if !spec.resources.is_empty() {
        let mut limits = Map::new();
        if let Some(cpus) = &spec.resources.cpus {
            limits.insert("cpu".into(), json!(cpus));
        }
        if let Some(memory) = &spec.resources.memory {
            limits.insert("memory".into(), json!(memory));
        }
        c.insert("resources".into(), json!({ "limits": limits }));
    }
    if let Some(check) = &spec.healthcheck {
        c.insert("readinessProbe".into(), probe(check));
    }
    Value::Object(c)
}

fn probe(check: &Healthcheck) -> Value {
    let mut p = match &check.http {
        Some(http) => {
            let mut m = Map::new();
            m.insert("httpGet".into(), json!({ "path": http.path, "port": http.port }));
            m
        }
        None => {
            let mut m = Map::new();
            m.insert("exec".into(), json!({ "command": check.test }));
            m
        }
    };
    if let Some(secs) = check.interval_secs {
        p.insert("periodSeconds".into(), json!(secs));
    }
    if let Some(secs) = check.timeout_secs {
        p.insert("timeoutSeconds".into(), json!(secs));
    }
    if let Some(secs) = check.start_period_secs {
        p.insert("initialDelaySeconds".into(), json!(secs));
    }
    if let Some(retries) = check.retries {
        p.insert("failureThreshold".into(), json!(retries));
    }
    Value::Object(p)
}

fn mount(m: &Mount) -> Value {
    let mut v = Map::new();
    v.insert("name".into(), json!(m.volume));
    v.insert("mountPath".into(), json!(m.mount_path));
    if let Some(sub) = &m.sub_path {
        v.insert("subPath".into(), json!(sub));
    }
    if m.read_only {
        v.insert("readOnly".into(), json!(true));
    }
    Value::Object(v)
}

fn pod_volume(volume: &PodVolume) -> Value {
    match volume {
        PodVolume::Claim { name, claim_name } => json!({
            "name": name,
            "persistentVolumeClaim": { "claimName": claim_name },
        }),
        PodVolume::EmptyDir { name } => json!({ "name": name, "emptyDir": {} }),
    }
}

fn claim_template(claim: &ClaimTemplate) -> Value {
    json!({
        "metadata": {
            "name": claim.name,
            "labels": claim.labels,
            "annotations": claim.annotations,
        },
        "spec": claim_spec(&claim.size, claim.storage_class.as_deref()),
    })
}

fn claim_spec(size: &str, storage_class: Option<&str>) -> Value {
    let mut spec = Map::new();
    spec.insert("accessModes".into(), json!(["ReadWriteOnce"]));
    spec.insert("resources".into(), json!({ "requests": { "storage": size } }));
    if let Some(class) = storage_class {
        spec.insert("storageClassName".into(), json!(class));
    }
    Value::Object(spec)
}

fn service(spec: &ServiceSpec) -> Value {
    let ports: Vec<Value> = spec
        .ports
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "port": p.port,
                "targetPort": p.target_port,
                "protocol": p.protocol.as_str(),
            })
        })
        .collect();

    let mut s = Map::new();
    s.insert("type".into(), json!("ClusterIP"));
    s.insert("selector".into(), json!(spec.selector));
    s.insert("ports".into(), Value::Array(ports));
    if spec.headless {
        s.insert("clusterIP".into(), json!("None"));
    }
    Value::Object(s)
}

fn volume(spec: &VolumeSpec) -> Value {
    claim_spec(&spec.size, spec.storage_class.as_deref())
}

fn ingress(spec: &RouteSpec) -> Value {
    let paths: Vec<Value> = spec
        .rules
        .iter()
        .map(|r| {
            json!({
                "path": r.path,
                "pathType": "ImplementationSpecific",
                "backend": {
                    "service": { "name": r.service, "port": { "number": r.port } },
                },
            })
        })
        .collect();
    json!({ "rules": [{ "http": { "paths": paths } }] })
}

fn http_route(spec: &RouteSpec) -> Value {
    let rules: Vec<Value> = spec
        .rules
        .iter()
        .map(|r| {
            json!({
                "matches": [{ "path": { "type": "PathPrefix", "value": r.path } }],
                "backendRefs": [{ "name": r.service, "port": r.port }],
            })
        })
        .collect();

    let mut s = Map::new();
    if let Some(gateway) = &spec.gateway {
        s.insert(
            "parentRefs".into(),
            json!([{ "name": gateway.name, "namespace": gateway.namespace }]),
        );
    }
    s.insert("rules".into(), Value::Array(rules));
    Value::Object(s)
}
