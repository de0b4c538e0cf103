//! Index rebuild and catalog publication tests

use std::sync::Arc;

use serde_json::Value;

use softpack_frontend::{
    Catalog, EnvironmentIndex, EnvironmentPath, NotificationBus, Status,
};

use crate::common::{building_bundle, failed_bundle, readers, ready_bundle, TestRemote};

fn env(path: &str) -> EnvironmentPath {
    EnvironmentPath::parse(path).unwrap()
}

fn catalog(remote: &TestRemote) -> Arc<Catalog> {
    Arc::new(Catalog::new(remote.open_store(), NotificationBus::default()))
}

#[test]
fn test_rebuild_classifies_every_bundle() {
    let remote = TestRemote::new();
    remote
        .add_environment("users/alice/py-1.0", &ready_bundle())
        .add_environment("users/alice/py-2.0", &failed_bundle())
        .add_environment("groups/hgi/r-4.3", &building_bundle());

    let store = remote.open_store();
    let index = EnvironmentIndex::rebuild(&store).unwrap();
    assert_eq!(index.len(), 3);

    let ready = index.get(&env("users/alice/py-1.0")).unwrap();
    assert_eq!(ready.status, Status::Ready);
    assert_eq!(ready.description, "A python environment");
    assert_eq!(ready.packages, vec!["py-numpy@1.26", "py-pandas"]);
    assert_eq!(ready.tags, vec!["python"]);
    assert_eq!(ready.readme, "# numerics");
    assert!(ready.softpack);

    let failed = index.get(&env("users/alice/py-2.0")).unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert!(!failed.softpack);
    assert!(failed.readme.is_empty());

    let building = index.get(&env("groups/hgi/r-4.3")).unwrap();
    assert_eq!(building.status, Status::Building);
    assert!(building.softpack);
}

#[test]
fn test_rebuild_skips_broken_environments() {
    let remote = TestRemote::new();
    remote
        .add_environment("users/alice/py-1.0", &ready_bundle())
        .add_environment(
            "users/alice/broken-1",
            &[("module", ""), ("softpack.yml", "packages: []\n")],
        )
        .add_environment(
            "users/bob/bad-yaml-1",
            &[("module", ""), ("softpack.yml", "packages: [\n"), ("README.md", "x")],
        )
        .commit_files(&[("environments/users/stray.txt", "not an owner")]);

    let store = remote.open_store();
    let index = EnvironmentIndex::rebuild(&store).unwrap();

    assert_eq!(index.len(), 1);
    assert!(index.get(&env("users/alice/py-1.0")).is_some());
    assert!(index.get(&env("users/alice/broken-1")).is_none());
    assert!(index.get(&env("users/bob/bad-yaml-1")).is_none());
}

#[test]
fn test_rebuild_of_empty_remote() {
    let remote = TestRemote::new();
    let store = remote.open_store();

    let index = EnvironmentIndex::rebuild(&store).unwrap();
    assert!(index.is_empty());
    assert_eq!(index.to_json().unwrap(), "{}");
}

#[test]
fn test_rebuild_with_only_one_namespace() {
    let remote = TestRemote::new();
    remote.add_environment("groups/hgi/r-4.3", &failed_bundle());

    let store = remote.open_store();
    let index = EnvironmentIndex::rebuild(&store).unwrap();
    assert_eq!(index.len(), 1);
}

#[test]
fn test_snapshot_is_in_natural_order() {
    let remote = TestRemote::new();
    remote
        .add_environment("users/alice/py-1.10", &failed_bundle())
        .add_environment("users/alice/py-1.9", &failed_bundle())
        .add_environment("groups/hgi/Alpha-2", &failed_bundle());

    let store = remote.open_store();
    let json = EnvironmentIndex::rebuild(&store).unwrap().to_json().unwrap();

    let keys: Vec<String> = serde_json::from_str::<serde_json::Map<String, Value>>(&json)
        .unwrap()
        .keys()
        .cloned()
        .collect();
    assert_eq!(
        keys,
        vec!["groups/hgi/Alpha-2", "users/alice/py-1.9", "users/alice/py-1.10"]
    );
}

#[test]
fn test_catalog_index_changes_only_on_reindex() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let catalog = catalog(&remote);

    assert!(catalog.index().is_empty());
    catalog.reindex().unwrap();
    let before = catalog.index();
    assert_eq!(before.len(), 1);

    catalog
        .store()
        .add_files(&env("users/bob/r-4.3"), readers(&failed_bundle()))
        .unwrap();
    assert_eq!(catalog.index().len(), 1);

    let after = catalog.reindex().unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(catalog.index(), after);

    // readers holding the old snapshot keep it
    assert_eq!(before.len(), 1);
}

#[test]
fn test_write_environment_publishes() {
    let remote = TestRemote::new();
    let catalog = catalog(&remote);

    catalog.reindex().unwrap();
    let first = catalog.bus().latest().unwrap();
    assert_eq!(first.message.as_ref(), r#"{"id":-1,"result":{}}"#);

    let index = catalog
        .write_environment(&env("users/alice/py-1.0"), readers(&building_bundle()))
        .unwrap();
    assert_eq!(index.len(), 1);

    let second = catalog.bus().latest().unwrap();
    assert!(second.sequence > first.sequence);

    let message: Value = serde_json::from_str(&second.message).unwrap();
    assert_eq!(message["id"], -1);
    assert_eq!(message["result"]["users/alice/py-1.0"]["Status"], 0);

    let index = catalog.remove_environment(&env("users/alice/py-1.0")).unwrap();
    assert!(index.is_empty());
    assert!(catalog.bus().latest().unwrap().sequence > second.sequence);
}

#[test]
fn test_environments_json_follows_index() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let catalog = catalog(&remote);

    assert!(catalog.environments_json().identity().is_none());

    catalog.reindex().unwrap();
    let body = catalog.environments_json().identity().unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["users/alice/py-1.0"]["ReadMe"], "# numerics");
    assert_eq!(json["users/alice/py-1.0"]["Status"], 2);

    let modified = catalog.environments_json().modified();
    let etag = catalog.environments_json().etag(false);

    catalog.reindex().unwrap();
    assert_eq!(catalog.environments_json().modified(), modified);
    assert_eq!(catalog.environments_json().etag(false), etag);
}

#[test]
fn test_refresh_picks_up_external_builds() {
    let remote = TestRemote::new();
    let catalog = catalog(&remote);
    catalog.reindex().unwrap();

    assert!(!catalog.refresh().unwrap());

    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    assert!(catalog.refresh().unwrap());
    assert_eq!(
        catalog.index().get(&env("users/alice/py-1.0")).unwrap().status,
        Status::Ready
    );

    assert!(!catalog.refresh().unwrap());
}

#[test]
fn test_failed_write_keeps_published_index() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let catalog = catalog(&remote);
    catalog.reindex().unwrap();
    let sequence = catalog.bus().latest().unwrap().sequence;

    remote.reject_pushes();
    assert!(catalog
        .write_environment(&env("users/bob/r-4.3"), readers(&failed_bundle()))
        .is_err());

    assert_eq!(catalog.index().len(), 1);
    assert_eq!(catalog.bus().latest().unwrap().sequence, sequence);
}
