use converge::planner::diff::{AttrDiff, InstanceDiff};
use converge::state::models::{InstanceState, ResourceState};
use converge::state::sqlite::SqliteBackend;
use converge::state::{DiffStore, StateStore};
use tempfile::TempDir;

fn create_test_store() -> (TempDir, SqliteBackend) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("converge.db");
    let store = SqliteBackend::open(path.to_str().unwrap()).unwrap();
    store.initialize().unwrap();
    (dir, store)
}

fn meta() -> ResourceState {
    let mut meta = ResourceState::new("null_resource", "null");
    meta.dependencies = vec!["null_resource.base".to_string()];
    meta
}

fn instance(id: &str) -> InstanceState {
    InstanceState::new(id).with_attribute("triggers", serde_json::json!({"a": "1"}))
}

#[test]
fn test_initialize_is_idempotent() {
    let (_dir, store) = create_test_store();
    store.initialize().unwrap();
}

#[tokio::test]
async fn test_write_and_read_state() {
    let (_dir, store) = create_test_store();

    assert!(store.read_state("null_resource.web").await.unwrap().is_none());
    store
        .write_state("null_resource.web", &meta(), Some(&instance("abc")))
        .await
        .unwrap();

    let resource = store.get_resource("null_resource.web").await.unwrap().unwrap();
    assert_eq!(resource.resource_type, "null_resource");
    assert_eq!(resource.provider, "null");
    assert_eq!(resource.dependencies, vec!["null_resource.base".to_string()]);
    assert_eq!(resource.primary, Some(instance("abc")));
    assert!(resource.deposed.is_empty());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("converge.db");
    let path = path.to_str().unwrap();
    {
        let store = SqliteBackend::open(path).unwrap();
        store.initialize().unwrap();
        let mut tainted = instance("abc");
        tainted.tainted = true;
        store
            .write_state("null_resource.web.0", &meta(), Some(&tainted))
            .await
            .unwrap();
    }

    let store = SqliteBackend::open(path).unwrap();
    store.initialize().unwrap();
    let primary = store.read_state("null_resource.web.0").await.unwrap().unwrap();
    assert_eq!(primary.id, "abc");
    assert!(primary.tainted);
}

#[tokio::test]
async fn test_clearing_the_last_instance_removes_the_record() {
    let (_dir, store) = create_test_store();
    store
        .write_state("null_resource.web", &meta(), Some(&instance("abc")))
        .await
        .unwrap();

    store
        .write_state("null_resource.web", &meta(), None)
        .await
        .unwrap();

    assert!(store.get_resource("null_resource.web").await.unwrap().is_none());
    assert!(store.list_states().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_instance_without_id_clears_primary() {
    let (_dir, store) = create_test_store();
    store
        .write_state("null_resource.web", &meta(), Some(&instance("abc")))
        .await
        .unwrap();

    store
        .write_state("null_resource.web", &meta(), Some(&InstanceState::default()))
        .await
        .unwrap();

    assert!(store.read_state("null_resource.web").await.unwrap().is_none());
}

#[tokio::test]
async fn test_depose_and_restore() {
    let (_dir, store) = create_test_store();
    let id = "null_resource.web";
    store
        .write_state(id, &meta(), Some(&instance("old")))
        .await
        .unwrap();

    assert!(store.depose(id).await.unwrap());
    assert!(store.read_state(id).await.unwrap().is_none());
    assert_eq!(store.deposed(id).await.unwrap(), vec![instance("old")]);

    store
        .write_state(id, &meta(), Some(&instance("new")))
        .await
        .unwrap();
    assert!(store.undepose(id, Some(&instance("new"))).await.unwrap());

    let resource = store.get_resource(id).await.unwrap().unwrap();
    assert_eq!(resource.primary.unwrap().id, "old");
    assert_eq!(resource.deposed, vec![instance("new")]);
}

#[tokio::test]
async fn test_depose_without_primary() {
    let (_dir, store) = create_test_store();
    assert!(!store.depose("null_resource.web").await.unwrap());
    assert!(!store.undepose("null_resource.web", None).await.unwrap());
}

#[tokio::test]
async fn test_list_states_is_ordered() {
    let (_dir, store) = create_test_store();
    for id in ["null_resource.web.1", "null_resource.app", "null_resource.web.0"] {
        store
            .write_state(id, &meta(), Some(&instance(id)))
            .await
            .unwrap();
    }

    let ids: Vec<String> = store
        .list_states()
        .await
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(
        ids,
        vec!["null_resource.app", "null_resource.web.0", "null_resource.web.1"]
    );
}

#[tokio::test]
async fn test_diffs_write_list_and_clear() {
    let store = SqliteBackend::open_memory().unwrap();
    store.initialize().unwrap();
    let diff = InstanceDiff::new()
        .with_attribute("id", AttrDiff::computed())
        .with_attribute(
            "triggers",
            AttrDiff::change(serde_json::Value::Null, serde_json::json!({"a": "1"})).forces_new(),
        );

    store.write_diff("null_resource.web", Some(&diff)).await.unwrap();
    store
        .write_diff("null_resource.app", Some(&InstanceDiff::destroy_only()))
        .await
        .unwrap();

    assert_eq!(
        store.read_diff("null_resource.web").await.unwrap(),
        Some(diff.clone())
    );
    let listed = store.list_diffs().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].0, "null_resource.app");
    assert!(listed[0].1.destroy);

    store.write_diff("null_resource.web", None).await.unwrap();
    assert!(store.read_diff("null_resource.web").await.unwrap().is_none());
    assert_eq!(store.list_diffs().await.unwrap().len(), 1);
}
