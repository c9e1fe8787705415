//! End-to-end deploy runs against in-memory collaborators.

mod support;

use deckhand_core::RoutingBackend;
use deckhand_pipeline::{ApplyOutcome, InMemoryBuilder, PipelineState, RecordStatus, WorkloadStatus};
use deckhand_stack::{ResourceKey, ResourceKind};
use serial_test::serial;
use std::time::Duration;
use support::{EnvGuard, Harness};

fn key(kind: ResourceKind, name: &str) -> ResourceKey {
    ResourceKey::new(kind, "dev", name)
}

fn shop_with_build(h: &Harness) {
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  compose: docker-compose.yml
"#,
    );
    h.write(
        "shop/docker-compose.yml",
        r#"
services:
  api:
    build: ./api
    ports: ["8080"]
"#,
    );
    h.write("shop/api/Dockerfile", "FROM alpine:3.20\nCOPY . /app\n");
    h.write("shop/api/main.sh", "echo hello\n");
}

#[tokio::test]
async fn test_redeploy_skips_unchanged_build_and_changes_nothing() {
    let h = Harness::new();
    shop_with_build(&h);

    let first = h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    assert_eq!(first.state, PipelineState::Done);
    assert_eq!(first.builds.len(), 1);
    assert!(first.builds[0].skipped.is_none());
    assert!(first.builds[0].image.starts_with("registry.test/dev/shop-api:"));
    assert!(h.cluster.contains(&key(ResourceKind::Deployment, "api")));
    assert!(h.cluster.contains(&key(ResourceKind::Service, "api")));
    let ip = h.cluster.cluster_ip(&key(ResourceKind::Service, "api"));

    let second = h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    assert_eq!(h.builder.builds().len(), 1);
    let skipped = second.builds[0].skipped.as_deref().unwrap();
    assert!(skipped.contains("unchanged"), "{}", skipped);
    assert_eq!(second.builds[0].image, first.builds[0].image);
    assert!(second
        .applied
        .iter()
        .all(|(_, outcome)| *outcome == ApplyOutcome::Unchanged));
    assert!(second.removed.is_empty());
    assert_eq!(h.cluster.cluster_ip(&key(ResourceKind::Service, "api")), ip);

    let record = h.records.get("dev", "shop").unwrap();
    assert_eq!(record.status, RecordStatus::Deployed);
    assert_eq!(record.builds["api"].image, first.builds[0].image);
    assert!(record.resources.contains(&key(ResourceKind::Deployment, "api")));
}

#[tokio::test]
async fn test_forced_build_is_reported() {
    let h = Harness::new();
    shop_with_build(&h);
    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let mut options = h.options("shop/deckhand.yml");
    options.force_build = true;
    let summary = h.coordinator.deploy(options).await.unwrap();

    assert_eq!(h.builder.builds().len(), 2);
    assert!(summary.builds[0].forced);
    assert!(summary.builds[0].skipped.is_none());
}

#[tokio::test]
async fn test_missing_image_is_rebuilt() {
    let h = Harness::new();
    shop_with_build(&h);
    let first = h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    h.builder.remove_image(&first.builds[0].image);
    let second = h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(h.builder.builds().len(), 2);
    assert!(second.builds[0].skipped.is_none());
    assert!(!second.builds[0].forced);
}

#[tokio::test]
async fn test_changed_context_is_rebuilt() {
    let h = Harness::new();
    shop_with_build(&h);
    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    h.write("shop/api/main.sh", "echo changed\n");
    let second = h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(h.builder.builds().len(), 2);
    assert!(second.builds[0].skipped.is_none());
}

#[tokio::test]
async fn test_discovered_ports_create_a_network_service() {
    let h = Harness::with_builder(InMemoryBuilder::new().with_exposed_ports("worker", &[9000]));
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: docker-compose.yml\n",
    );
    h.write(
        "shop/docker-compose.yml",
        "services:\n  worker:\n    build: ./worker\n",
    );
    h.write("shop/worker/Dockerfile", "FROM alpine:3.20\nEXPOSE 9000\n");

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let service = h.cluster.get(&key(ResourceKind::Service, "worker")).unwrap();
    assert_eq!(service["spec"]["ports"][0]["port"], 9000);
}

#[tokio::test]
async fn test_secret_values_never_reach_output() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - echo "token=$API_TOKEN"
"#,
    );

    let mut options = h.options("shop/deckhand.yml");
    options.variables = vec![("API_TOKEN".to_string(), "s3cr3t-value".to_string())];
    h.coordinator.deploy(options).await.unwrap();

    let text = h.output.text();
    assert!(text.contains("token=***"), "{}", text);
    assert!(!text.contains("s3cr3t-value"));
}

#[tokio::test]
async fn test_exports_flow_into_later_commands_and_the_record() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - echo "DB_URL=postgres://db:5432/shop" >> "$DECKHAND_ENV"
  - echo "url is $DB_URL"
  - printf '%s' "$DB_URL" > url.txt
"#,
    );

    let summary = h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(summary.exports, vec!["DB_URL".to_string()]);
    assert!(h.output.text().contains("url is ***"));
    assert_eq!(h.read("shop/url.txt"), "postgres://db:5432/shop");
    let record = h.records.get("dev", "shop").unwrap();
    assert_eq!(record.outputs["DB_URL"], "postgres://db:5432/shop");
}

#[tokio::test]
async fn test_failing_command_fails_the_deploy_and_marks_the_record() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - name: Migrate
    command: exit 7
  - touch never.txt
"#,
    );

    let err = h
        .coordinator
        .deploy(h.options("shop/deckhand.yml"))
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("error executing command 'Migrate'"), "{}", err);
    assert!(err.contains("exit code 7"), "{}", err);
    assert!(!h.path("shop/never.txt").exists());
    assert_eq!(h.records.get("dev", "shop").unwrap().status, RecordStatus::Error);
}

#[tokio::test]
async fn test_dependency_variables_are_namespaced() {
    let h = Harness::new();
    h.write(
        "db/deckhand.yml",
        r#"
name: db
deploy:
  - echo "DB_HOST=db.internal" >> "$DECKHAND_ENV"
"#,
    );
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
dependencies:
  db:
    file: ../db/deckhand.yml
    variables:
      SIZE: small
deploy:
  - printf '%s %s' "$DECKHAND_DEPENDENCY_DB_VARIABLE_DB_HOST" "$DECKHAND_DEPENDENCY_DB_VARIABLE_SIZE" > deps.txt
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(h.read("shop/deps.txt"), "db.internal small");
    let record = h.records.get("dev", "db").unwrap();
    assert_eq!(record.status, RecordStatus::Deployed);
}

#[tokio::test]
async fn test_failing_wait_dependency_fails_the_parent() {
    let h = Harness::new();
    h.write("db/deckhand.yml", "name: db\ndeploy:\n  - exit 4\n");
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
dependencies:
  db:
    file: ../db/deckhand.yml
deploy:
  - touch deployed.txt
"#,
    );

    let err = h
        .coordinator
        .deploy(h.options("shop/deckhand.yml"))
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("dependency 'db' failed"), "{}", err);
    assert!(!h.path("shop/deployed.txt").exists());
}

#[tokio::test]
async fn test_background_dependency_failure_is_a_warning() {
    let h = Harness::new();
    h.write("db/deckhand.yml", "name: db\ndeploy:\n  - exit 4\n");
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
dependencies:
  db:
    file: ../db/deckhand.yml
    wait: false
deploy:
  - touch deployed.txt
"#,
    );

    let summary = h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert!(h.path("shop/deployed.txt").exists());
    assert!(
        summary
            .warnings
            .iter()
            .any(|w| w.contains("dependency 'db' failed")),
        "{:?}",
        summary.warnings
    );
    assert_eq!(h.records.get("dev", "shop").unwrap().status, RecordStatus::Deployed);
}

#[tokio::test]
async fn test_skipping_dependencies_only_reads_their_records() {
    let h = Harness::new();
    h.write("db/deckhand.yml", "name: db\ndeploy:\n  - touch db-deployed.txt\n");
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
dependencies:
  db:
    file: ../db/deckhand.yml
deploy:
  - "true"
"#,
    );

    let mut options = h.options("shop/deckhand.yml");
    options.skip_dependencies = true;
    h.coordinator.deploy(options).await.unwrap();

    assert!(!h.path("db/db-deployed.txt").exists());
    assert!(h.records.get("dev", "db").is_none());
}

#[tokio::test]
#[serial]
async fn test_shell_environment_expands_compose_and_manifest_values() {
    let _tag = EnvGuard::set("SHOP_RELEASE_TAG", "v42");
    let h = Harness::new();
    h.write("db/deckhand.yml", "name: db\ndeploy:\n  - printf '%s' \"$SIZE\" > size.txt\n");
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
variables:
  CFG: "${SHOP_RELEASE_TAG}-x"
dependencies:
  db:
    file: ../db/deckhand.yml
    variables:
      SIZE: "${SHOP_RELEASE_TAG}-small"
deploy:
  commands:
    - printf '%s' "$CFG" > cfg.txt
  compose: docker-compose.yml
"#,
    );
    h.write(
        "shop/docker-compose.yml",
        "services:\n  web:\n    image: nginx:${SHOP_RELEASE_TAG}\n",
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let web = h.cluster.get(&key(ResourceKind::Deployment, "web")).unwrap();
    assert_eq!(web["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:v42");
    assert_eq!(h.read("shop/cfg.txt"), "v42-x");
    assert_eq!(h.read("db/size.txt"), "v42-small");

    let record = h.records.get("dev", "shop").unwrap();
    assert!(record.variables.iter().all(|v| v.name != "SHOP_RELEASE_TAG"));
}

#[tokio::test]
async fn test_mutual_dependencies_fail_as_a_cycle() {
    let h = Harness::new();
    h.write(
        "a/deckhand.yml",
        r#"
name: a
dependencies:
  b:
    file: ../b/deckhand.yml
deploy:
  compose: docker-compose.yml
"#,
    );
    h.write("a/docker-compose.yml", "services:\n  api:\n    image: shop/api:1\n");
    h.write(
        "b/deckhand.yml",
        r#"
name: b
dependencies:
  a:
    file: ../a/deckhand.yml
deploy:
  - touch deployed.txt
"#,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        h.coordinator.deploy(h.options("a/deckhand.yml")),
    )
    .await
    .expect("cyclic deploy did not return");

    let err = result.unwrap_err().to_string();
    assert!(err.contains("pipeline dependency cycle: dev/a -> dev/b -> dev/a"), "{}", err);
    assert!(!h.path("b/deployed.txt").exists());
    assert!(h.cluster.keys().is_empty());
}

#[tokio::test]
async fn test_pipeline_running_itself_fails_as_a_cycle() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - name: Again
    pipeline:
      file: deckhand.yml
  - touch deployed.txt
"#,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        h.coordinator.deploy(h.options("shop/deckhand.yml")),
    )
    .await
    .expect("self-referencing deploy did not return");

    let err = result.unwrap_err().to_string();
    assert!(err.contains("pipeline dependency cycle: dev/shop -> dev/shop"), "{}", err);
    assert!(!h.path("shop/deployed.txt").exists());
    assert!(h.cluster.keys().is_empty());
}

#[tokio::test]
async fn test_same_dependency_in_two_branches_is_not_a_cycle() {
    let h = Harness::new();
    h.write("db/deckhand.yml", "name: db\ndeploy:\n  - \"true\"\n");
    h.write(
        "cache/deckhand.yml",
        "name: cache\ndependencies:\n  db:\n    file: ../db/deckhand.yml\ndeploy:\n  - \"true\"\n",
    );
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
dependencies:
  db:
    file: ../db/deckhand.yml
  cache:
    file: ../cache/deckhand.yml
deploy:
  - touch deployed.txt
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert!(h.path("shop/deployed.txt").exists());
    assert_eq!(h.records.get("dev", "db").unwrap().status, RecordStatus::Deployed);
}

#[tokio::test]
async fn test_nested_pipeline_image_does_not_leak_to_parent() {
    let h = Harness::new();
    h.write(
        "frontend/deckhand.yml",
        r#"
name: frontend
remote: true
image: alpine:3.20
deploy:
  - echo nested
"#,
    );
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
remote: true
image: busybox:1.36
deploy:
  - name: Frontend
    pipeline:
      file: ../frontend/deckhand.yml
      image: node:20
  - echo after
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let execs = h.provisioner.execs();
    let nested = execs.iter().find(|e| e.command == "echo nested").unwrap();
    assert_eq!(nested.image, "node:20");
    let after = execs.iter().find(|e| e.command == "echo after").unwrap();
    assert_eq!(after.image, "busybox:1.36");

    assert!(h.records.get("dev", "frontend").is_some());
    assert!(h.records.get("dev", "shop").is_some());
    assert_eq!(h.provisioner.released(), 2);
}

#[tokio::test]
async fn test_switching_routing_backend_removes_the_other_route_kind() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: docker-compose.yml\n",
    );
    h.write(
        "shop/docker-compose.yml",
        r#"
services:
  web:
    image: nginx:1.27
    ports: ["80"]
    x-public: true
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    assert!(h.cluster.contains(&key(ResourceKind::Ingress, "web")));

    let mut options = h.options("shop/deckhand.yml");
    options.routing = Some(RoutingBackend::Gateway);
    let summary = h.coordinator.deploy(options).await.unwrap();

    assert!(h.cluster.contains(&key(ResourceKind::HttpRoute, "web")));
    assert!(!h.cluster.contains(&key(ResourceKind::Ingress, "web")));
    assert_eq!(summary.removed, vec![key(ResourceKind::Ingress, "web")]);
}

#[tokio::test]
async fn test_partial_deploy_includes_dependencies_only() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: docker-compose.yml\n",
    );
    h.write(
        "shop/docker-compose.yml",
        r#"
services:
  api:
    image: shop/api:1
    depends_on: [db]
  db:
    image: postgres:16
  web:
    image: nginx:1.27
"#,
    );

    let mut options = h.options("shop/deckhand.yml");
    options.services = vec!["api".to_string()];
    h.coordinator.deploy(options).await.unwrap();

    assert!(h.cluster.contains(&key(ResourceKind::Deployment, "api")));
    assert!(h.cluster.contains(&key(ResourceKind::Deployment, "db")));
    assert!(!h.cluster.contains(&key(ResourceKind::Deployment, "web")));
}

#[tokio::test]
async fn test_undefined_depends_on_fails_before_any_change() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: docker-compose.yml\n",
    );
    h.write(
        "shop/docker-compose.yml",
        r#"
services:
  api:
    image: shop/api:1
    depends_on: [cache]
"#,
    );

    let result = h.coordinator.deploy(h.options("shop/deckhand.yml")).await;

    assert!(result.is_err());
    assert!(h.cluster.keys().is_empty());
}

fn shop_with_compose(h: &Harness, compose: &str) {
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: docker-compose.yml\n",
    );
    h.write("shop/docker-compose.yml", compose);
}

fn applied_position(h: &Harness, kind: ResourceKind, name: &str) -> usize {
    let wanted = key(kind, name);
    h.cluster
        .history()
        .iter()
        .position(|(k, _)| *k == wanted)
        .unwrap_or_else(|| panic!("{wanted} was not applied"))
}

#[tokio::test]
async fn test_started_dependency_is_applied_first() {
    let h = Harness::new();
    shop_with_compose(
        &h,
        r#"
services:
  api:
    image: shop/api:1
    depends_on: [db]
  db:
    image: postgres:16
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert!(
        applied_position(&h, ResourceKind::Deployment, "db")
            < applied_position(&h, ResourceKind::Deployment, "api")
    );
}

#[tokio::test]
async fn test_healthy_dependency_is_ready_before_dependent() {
    let h = Harness::new();
    shop_with_compose(
        &h,
        r#"
services:
  web:
    image: shop/web:1
    depends_on:
      api:
        condition: service_healthy
  api:
    image: shop/api:1
    ports: ["8080"]
    depends_on:
      db:
        condition: service_healthy
  db:
    image: postgres:16
    ports: ["5432"]
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let db = applied_position(&h, ResourceKind::Deployment, "db");
    let api = applied_position(&h, ResourceKind::Deployment, "api");
    assert!(applied_position(&h, ResourceKind::Service, "db") < db);
    assert!(db < api);
    assert!(api < applied_position(&h, ResourceKind::Deployment, "web"));
}

#[tokio::test]
async fn test_completed_job_releases_dependent() {
    let h = Harness::new();
    shop_with_compose(
        &h,
        r#"
services:
  api:
    image: shop/api:1
    depends_on:
      migrate:
        condition: service_completed_successfully
  migrate:
    image: shop/migrate:1
    restart: "no"
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    assert!(
        applied_position(&h, ResourceKind::Job, "migrate")
            < applied_position(&h, ResourceKind::Deployment, "api")
    );
}

#[tokio::test]
async fn test_failed_job_blocks_dependent() {
    let h = Harness::new();
    shop_with_compose(
        &h,
        r#"
services:
  api:
    image: shop/api:1
    depends_on:
      migrate:
        condition: service_completed_successfully
  migrate:
    image: shop/migrate:1
    restart: "no"
"#,
    );
    h.cluster.set_status(
        key(ResourceKind::Job, "migrate"),
        WorkloadStatus {
            desired: 1,
            failed: 1,
            ..Default::default()
        },
    );

    let err = h
        .coordinator
        .deploy(h.options("shop/deckhand.yml"))
        .await
        .unwrap_err();

    assert!(
        format!("{err:#}").contains("service 'migrate' failed before 'api' could start"),
        "{err:#}"
    );
    assert!(h.cluster.contains(&key(ResourceKind::Job, "migrate")));
    assert!(!h.cluster.contains(&key(ResourceKind::Deployment, "api")));
}

#[tokio::test]
async fn test_unknown_depends_on_condition_fails_before_any_change() {
    let h = Harness::new();
    shop_with_compose(
        &h,
        r#"
services:
  api:
    image: shop/api:1
    depends_on:
      db:
        condition: service_ready
  db:
    image: postgres:16
"#,
    );

    let err = h
        .coordinator
        .deploy(h.options("shop/deckhand.yml"))
        .await
        .unwrap_err();

    assert!(
        format!("{err:#}").contains("services[api].depends_on.db.condition: invalid value 'service_ready'"),
        "{err:#}"
    );
    assert!(h.cluster.keys().is_empty());
}

#[tokio::test]
async fn test_override_file_merges_into_base_service() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: [docker-compose.yml, docker-compose.prod.yml]\n",
    );
    h.write(
        "shop/docker-compose.yml",
        "services:\n  api:\n    image: shop/api:1\n    ports: [\"8080\"]\n    environment:\n      REGION: eu\n",
    );
    h.write(
        "shop/docker-compose.prod.yml",
        "services:\n  api:\n    image: shop/api:2\n",
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let api = h.cluster.get(&key(ResourceKind::Deployment, "api")).unwrap();
    let container = &api["spec"]["template"]["spec"]["containers"][0];
    assert_eq!(container["image"], "shop/api:2");
    let env = container["env"].as_array().unwrap();
    assert!(env.iter().any(|e| e["name"] == "REGION" && e["value"] == "eu"));
    assert!(h.cluster.contains(&key(ResourceKind::Service, "api")));
}

#[tokio::test]
async fn test_cancellation_stops_the_running_command() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  - sleep 30\n  - touch never.txt\n",
    );

    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let err = h
        .coordinator
        .deploy(h.options("shop/deckhand.yml"))
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("cancelled"), "{}", err);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!h.path("shop/never.txt").exists());
}

#[tokio::test]
async fn test_endpoints_lists_routes_without_applying() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  compose: docker-compose.yml
  endpoints:
    docs:
      - { path: /docs, service: web, port: 80 }
"#,
    );
    h.write(
        "shop/docker-compose.yml",
        r#"
services:
  web:
    build: ./web
    ports: ["80"]
    x-public: true
"#,
    );

    let routes = h.coordinator.endpoints(h.options("shop/deckhand.yml")).await.unwrap();

    let mut names: Vec<_> = routes.iter().map(|r| r.metadata.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["docs".to_string(), "web".to_string()]);
    assert!(routes.iter().all(|r| r.kind == ResourceKind::Ingress));
    assert!(h.cluster.keys().is_empty());
    assert!(h.builder.builds().is_empty());
}
