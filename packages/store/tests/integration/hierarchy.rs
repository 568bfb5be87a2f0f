use common::{RawValue, Value};
use store::StoreError;

use crate::support::TestStore;

#[tokio::test]
async fn self_parenting_and_cycles_fail_without_change() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let a = session.create("Node").unwrap();
    let b = session.create("Node").unwrap();
    let c = session.create("Node").unwrap();
    session.set_parent(b, Some(a)).await.unwrap();
    session.set_parent(c, Some(b)).await.unwrap();

    assert!(matches!(
        session.set_parent(a, Some(a)).await,
        Err(StoreError::CircularReference { .. })
    ));
    assert!(matches!(
        session.set_parent(a, Some(c)).await,
        Err(StoreError::CircularReference { .. })
    ));
    assert_eq!(session.parent(a).await.unwrap(), None);
    assert_eq!(session.parent(c).await.unwrap(), Some(b));
}

#[tokio::test]
async fn cycle_check_walks_persisted_ancestors() {
    let t = TestStore::spawn().await;

    let mut session = t.session().await;
    let root = session.create("Node").unwrap();
    let child = session.create("Node").unwrap();
    session.set_parent(child, Some(root)).await.unwrap();
    session.save(&[child]).await.unwrap();
    let root_id = session.id(root).unwrap().unwrap();
    let child_id = session.id(child).unwrap().unwrap();
    session.commit().await.unwrap();

    // a fresh session only knows the root until it walks up from the child
    let mut session = t.session().await;
    let root = session.load(root_id).await.unwrap();
    let child = session.load(child_id).await.unwrap();
    assert!(matches!(
        session.set_parent(root, Some(child)).await,
        Err(StoreError::CircularReference { .. })
    ));
}

#[tokio::test]
async fn reparenting_detaches_from_the_old_parent() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let first = session.create("Node").unwrap();
    let second = session.create("Node").unwrap();
    let child = session.create("Node").unwrap();
    session.set_parent(child, Some(first)).await.unwrap();
    assert_eq!(session.children(first).await.unwrap(), vec![child]);

    session.set_parent(child, Some(second)).await.unwrap();
    assert!(session.children(first).await.unwrap().is_empty());
    assert_eq!(session.children(second).await.unwrap(), vec![child]);

    session.set_parent(child, None).await.unwrap();
    assert!(session.children(second).await.unwrap().is_empty());
    let roots = session.find_roots(Some("Node")).await.unwrap();
    assert_eq!(roots, vec![first, second, child]);
}

#[tokio::test]
async fn saving_a_child_saves_its_ancestors() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let top = session.create("Mid").unwrap();
    let middle = session.create("Mid").unwrap();
    let leaf = session.create("Leaf").unwrap();
    session.set_parent(middle, Some(top)).await.unwrap();
    session.set_parent(leaf, Some(middle)).await.unwrap();

    session.save(&[leaf]).await.unwrap();
    for handle in [top, middle, leaf] {
        assert!(session.id(handle).unwrap().is_some());
    }
    let leaf_id = session.id(leaf).unwrap().unwrap();
    session.commit().await.unwrap();

    let mut session = t.session().await;
    let leaf = session.load(leaf_id).await.unwrap();
    let chain = session.ancestors(leaf).await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(session.children(chain[0]).await.unwrap(), vec![leaf]);
    assert_eq!(session.descendants(chain[1]).await.unwrap(), vec![chain[0], leaf]);
}

#[tokio::test]
async fn inherited_parameters_follow_the_nearest_ancestor() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let grandparent = session
        .create_with("Node", [("A", RawValue::from("x"))])
        .unwrap();
    let parent = session.create("Node").unwrap();
    let child = session.create("Node").unwrap();
    session.set_parent(parent, Some(grandparent)).await.unwrap();
    session.set_parent(child, Some(parent)).await.unwrap();

    let inherited = session.inherited_params(child).await.unwrap();
    assert_eq!(inherited.get("A"), Some(&Value::String("x".into())));

    session.set_param(parent, "A", "y").unwrap();
    let inherited = session.inherited_params(child).await.unwrap();
    assert_eq!(inherited.get("A"), Some(&Value::String("y".into())));
    assert_eq!(inherited.len(), 1);
    assert!(session.params(child).unwrap().is_empty());
}

#[tokio::test]
async fn unique_parameters_skip_inherited_values() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let parent = session
        .create_with("Node", [("A", RawValue::from("x")), ("n", RawValue::from(1))])
        .unwrap();
    let child = session
        .create_with("Node", [("A", RawValue::from("x")), ("n", RawValue::from(2))])
        .unwrap();
    session.set_parent(child, Some(parent)).await.unwrap();

    let unique = session.unique_params(child).await.unwrap();
    assert_eq!(unique.len(), 1);
    assert_eq!(unique.get("n"), Some(&Value::Integer(2)));

    // roots have nothing to inherit
    assert_eq!(session.unique_params(parent).await.unwrap().len(), 2);
}

#[tokio::test]
async fn deleting_turns_children_into_roots() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let parent = session.create("Node").unwrap();
    let child = session
        .create_with("Node", [("n", RawValue::from(1))])
        .unwrap();
    session.set_parent(child, Some(parent)).await.unwrap();
    session.save(&[child]).await.unwrap();
    let parent_id = session.id(parent).unwrap().unwrap();
    let child_id = session.id(child).unwrap().unwrap();

    session.delete(parent).await.unwrap();
    assert!(session.is_deleted(parent).unwrap());
    assert_eq!(session.parent(child).await.unwrap(), None);
    assert!(matches!(
        session.set_param(parent, "n", 3),
        Err(StoreError::StaleObject(_))
    ));
    assert!(matches!(
        session.save(&[parent]).await,
        Err(StoreError::StaleObject(_))
    ));
    session.commit().await.unwrap();

    let mut session = t.session().await;
    assert!(session.find_by_id(parent_id).await.unwrap().is_none());
    let child = session.load(child_id).await.unwrap();
    assert_eq!(session.parent(child).await.unwrap(), None);
}
