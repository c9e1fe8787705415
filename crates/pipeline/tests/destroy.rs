//! Destroy runs: recorded variables, keep policy and removal failures.

mod support;

use deckhand_pipeline::RecordStatus;
use deckhand_stack::{ResourceKey, ResourceKind};
use support::Harness;

fn key(kind: ResourceKind, name: &str) -> ResourceKey {
    ResourceKey::new(kind, "dev", name)
}

#[tokio::test]
async fn test_destroy_sees_the_variables_deploy_used() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - "true"
destroy:
  - printf '%s' "$REGION" > region.txt
"#,
    );

    let mut options = h.options("shop/deckhand.yml");
    options.variables = vec![("REGION".to_string(), "eu-west-1".to_string())];
    h.coordinator.deploy(options).await.unwrap();

    let summary = h.coordinator.destroy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(h.read("shop/region.txt"), "eu-west-1");
    assert!(summary.record.is_none());
    assert!(h.records.get("dev", "shop").is_none());
}

#[tokio::test]
async fn test_destroy_sees_recorded_exports() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - echo "CLUSTER_ID=c-4821" >> "$DECKHAND_ENV"
destroy:
  - printf '%s' "$CLUSTER_ID" > cluster.txt
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    h.coordinator.destroy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(h.read("shop/cluster.txt"), "c-4821");
}

#[tokio::test]
async fn test_destroy_keeps_volumes_with_keep_policy() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: docker-compose.yml\n",
    );
    h.write(
        "shop/docker-compose.yml",
        r#"
services:
  db:
    image: postgres:16
    ports: ["5432"]
    volumes:
      - pg-data:/var/lib/postgresql/data
  cache:
    image: redis:7
    volumes:
      - cache-data:/data
volumes:
  pg-data:
    x-keep: true
  cache-data: {}
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    assert!(h.cluster.contains(&key(ResourceKind::PersistentVolumeClaim, "pg-data")));
    assert!(h.cluster.contains(&key(ResourceKind::PersistentVolumeClaim, "cache-data")));

    let summary = h.coordinator.destroy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(
        h.cluster.keys(),
        vec![key(ResourceKind::PersistentVolumeClaim, "pg-data")]
    );
    assert!(summary
        .removed
        .contains(&key(ResourceKind::PersistentVolumeClaim, "cache-data")));
    assert!(h.records.get("dev", "shop").is_none());
}

#[tokio::test]
async fn test_destroy_never_touches_objects_of_other_pipelines() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        "name: shop\ndeploy:\n  compose: docker-compose.yml\n",
    );
    h.write(
        "shop/docker-compose.yml",
        "services:\n  api:\n    image: shop/api:1\n",
    );
    let foreign = key(ResourceKind::Deployment, "billing");
    h.cluster.insert(
        foreign.clone(),
        deckhand_stack::labels::owner("billing"),
        Default::default(),
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    h.coordinator.destroy(h.options("shop/deckhand.yml")).await.unwrap();

    assert_eq!(h.cluster.keys(), vec![foreign]);
}

#[tokio::test]
async fn test_removal_failures_are_aggregated() {
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
  worker:
    image: shop/worker:1
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    h.cluster.fail_delete(key(ResourceKind::Deployment, "api"));
    h.cluster.fail_delete(key(ResourceKind::Deployment, "worker"));

    let err = h
        .coordinator
        .destroy(h.options("shop/deckhand.yml"))
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("failed to remove 2 resource(s)"), "{}", err);
    assert!(err.contains("Deployment/dev/api"), "{}", err);
    assert!(err.contains("Deployment/dev/worker"), "{}", err);
    assert_eq!(h.records.get("dev", "shop").unwrap().status, RecordStatus::Error);
}

#[tokio::test]
async fn test_failing_destroy_command_halts_the_destroy() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - "true"
destroy:
  - exit 3
  - touch second.txt
"#,
    );
    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let result = h.coordinator.destroy(h.options("shop/deckhand.yml")).await;

    assert!(result.is_err());
    assert!(!h.path("shop/second.txt").exists());
    assert_eq!(h.records.get("dev", "shop").unwrap().status, RecordStatus::Error);
}

#[tokio::test]
async fn test_force_destroy_continues_past_failures() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - "true"
destroy:
  - exit 3
  - touch second.txt
"#,
    );
    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();

    let mut options = h.options("shop/deckhand.yml");
    options.force_destroy = true;
    let summary = h.coordinator.destroy(options).await.unwrap();

    assert!(h.path("shop/second.txt").exists());
    assert_eq!(summary.warnings.len(), 1);
    assert!(summary.warnings[0].contains("exit code 3"));
    assert!(h.records.get("dev", "shop").is_none());
}

#[tokio::test]
async fn test_dependencies_are_destroyed_only_when_asked() {
    let h = Harness::new();
    h.write(
        "db/deckhand.yml",
        "name: db\ndeploy:\n  - \"true\"\ndestroy:\n  - touch db-destroyed.txt\n",
    );
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

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    h.coordinator.destroy(h.options("shop/deckhand.yml")).await.unwrap();
    assert!(!h.path("db/db-destroyed.txt").exists());
    assert!(h.records.get("dev", "db").is_some());

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    let mut options = h.options("shop/deckhand.yml");
    options.destroy_dependencies = true;
    h.coordinator.destroy(options).await.unwrap();
    assert!(h.path("db/db-destroyed.txt").exists());
    assert!(h.records.get("dev", "db").is_none());
}

#[tokio::test]
async fn test_destroying_parent_leaves_nested_pipeline_alone() {
    let h = Harness::new();
    h.write(
        "frontend/deckhand.yml",
        "name: frontend\ndeploy:\n  - \"true\"\ndestroy:\n  - touch nested-destroyed.txt\n",
    );
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  - pipeline:
      file: ../frontend/deckhand.yml
destroy:
  - "true"
"#,
    );

    h.coordinator.deploy(h.options("shop/deckhand.yml")).await.unwrap();
    h.coordinator.destroy(h.options("shop/deckhand.yml")).await.unwrap();

    assert!(!h.path("frontend/nested-destroyed.txt").exists());
    assert!(h.records.get("dev", "frontend").is_some());
}

#[tokio::test]
async fn test_test_phase_runs_without_touching_the_cluster() {
    let h = Harness::new();
    h.write(
        "shop/deckhand.yml",
        r#"
name: shop
deploy:
  compose: docker-compose.yml
test:
  - touch tested.txt
"#,
    );
    h.write(
        "shop/docker-compose.yml",
        "services:\n  api:\n    image: shop/api:1\n",
    );

    let summary = h.coordinator.test(h.options("shop/deckhand.yml")).await.unwrap();

    assert!(h.path("shop/tested.txt").exists());
    assert!(summary.applied.is_empty());
    assert!(h.cluster.keys().is_empty());
    assert!(h.records.get("dev", "shop").is_none());
}
