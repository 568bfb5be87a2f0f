use common::{RawValue, Value};
use sea_orm::sea_query::ExprTrait;
use serde_json::json;
use store::query::operators::{clause, gt, like};
use store::{EntityHandle, Predicate, Session, StoreError};

use crate::support::TestStore;

/// Two mids, each with two leaves; returns (mids, leaves by mid).
async fn small_tree(session: &mut Session) -> (Vec<EntityHandle>, Vec<Vec<EntityHandle>>) {
    let mut mids = Vec::new();
    let mut leaves = Vec::new();
    for (i, label) in ["left", "right"].into_iter().enumerate() {
        let mid = session
            .create_with("Mid", [("label", RawValue::from(label))])
            .unwrap();
        let mut own = Vec::new();
        for j in 0..2 {
            let leaf = session
                .create_with(
                    "Leaf",
                    [
                        ("score", RawValue::from((i * 2 + j) as f64)),
                        ("ok", RawValue::from(j == 0)),
                    ],
                )
                .unwrap();
            session.set_parent(leaf, Some(mid)).await.unwrap();
            own.push(leaf);
        }
        mids.push(mid);
        leaves.push(own);
    }
    session.save(&mids).await.unwrap();
    (mids, leaves)
}

#[tokio::test]
async fn entity_with_parent_id() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (mids, leaves) = small_tree(&mut session).await;
    let mid_id = session.id(mids[1]).unwrap().unwrap();

    let tree = Predicate::from_json(&json!({"Leaf": {"PARENT": {"id": mid_id}}})).unwrap();
    let found = session.find_complex(&tree).await.unwrap();
    assert_eq!(found, leaves[1]);
}

#[tokio::test]
async fn any_matches_either_branch() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (_, leaves) = small_tree(&mut session).await;

    let either = Predicate::entity(
        "Leaf",
        Predicate::any([Predicate::param("score", 0.0), Predicate::param("score", 3.0)]),
    );
    let found = session.find_complex(&either).await.unwrap();
    assert_eq!(found, vec![leaves[0][0], leaves[1][1]]);

    let neither = Predicate::entity(
        "Leaf",
        Predicate::any([Predicate::param("score", 10.0), Predicate::param("score", 11.0)]),
    );
    assert!(session.find_complex(&neither).await.unwrap().is_empty());
}

#[tokio::test]
async fn parent_of_a_root_is_false_not_an_error() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (mids, _) = small_tree(&mut session).await;

    let has_parent = Predicate::parent(Predicate::always());
    assert!(!session.is_valid(&has_parent, mids[0]).await.unwrap());

    let mids_with_parent = Predicate::entity("Mid", has_parent);
    assert!(session.find_complex(&mids_with_parent).await.unwrap().is_empty());
}

#[tokio::test]
async fn parameter_tests_mixed_with_structure() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (_, leaves) = small_tree(&mut session).await;

    // pushed-down parameter test plus a parent test evaluated per candidate
    let tree = Predicate::entity(
        "Leaf",
        Predicate::all([
            Predicate::param("ok", true),
            Predicate::parent(Predicate::param("label", like("r%"))),
        ]),
    );
    assert_eq!(session.find_complex(&tree).await.unwrap(), vec![leaves[1][0]]);

    // a clause can only run in the database, so it must be pushed down
    let tree = Predicate::entity(
        "Leaf",
        Predicate::all([
            Predicate::param("score", clause(|column| column.gte(2.0))),
            Predicate::param("ok", false),
        ]),
    );
    assert_eq!(session.find_complex(&tree).await.unwrap(), vec![leaves[1][1]]);
}

#[tokio::test]
async fn child_and_with_tests() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (mids, _) = small_tree(&mut session).await;

    let has_high_leaf = Predicate::entity(
        "Mid",
        Predicate::child(Predicate::param("score", gt(2.5))),
    );
    assert_eq!(session.find_complex(&has_high_leaf).await.unwrap(), vec![mids[1]]);

    let named_left = Predicate::entity(
        "Mid",
        Predicate::with(|view| {
            view.param("label") == Some(&Value::String("left".into()))
        }),
    );
    assert_eq!(session.find_complex(&named_left).await.unwrap(), vec![mids[0]]);
}

#[tokio::test]
async fn nested_entity_nodes_check_the_type() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (_, leaves) = small_tree(&mut session).await;

    let under_mid = Predicate::entity("Leaf", Predicate::parent(Predicate::entity("Mid", Predicate::always())));
    assert_eq!(session.find_complex(&under_mid).await.unwrap().len(), 4);

    let under_project = Predicate::entity(
        "Leaf",
        Predicate::parent(Predicate::entity("Project", Predicate::always())),
    );
    assert!(session.find_complex(&under_project).await.unwrap().is_empty());
    assert!(
        !session
            .is_valid(&Predicate::entity("Mid", Predicate::always()), leaves[0][0])
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn union_of_entity_nodes() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (mids, leaves) = small_tree(&mut session).await;

    let tree = Predicate::from_json(&json!({
        "ANY": [
            {"Mid": {"label": "left"}},
            {"Leaf": {"score": 3.0}}
        ]
    }))
    .unwrap();
    assert_eq!(session.find_complex(&tree).await.unwrap(), vec![mids[0], leaves[1][1]]);
}

#[tokio::test]
async fn unknown_keys_are_false_in_predicates() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let (mids, _) = small_tree(&mut session).await;

    let tree = Predicate::param("score", 1.0);
    assert!(!session.is_valid(&tree, mids[0]).await.unwrap());

    // the root of a search must name a type
    assert!(matches!(
        session.find_complex(&tree).await,
        Err(StoreError::Filter(_))
    ));
}

#[tokio::test]
async fn predicates_work_on_unsaved_entities() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let leaf = session
        .create_with("Leaf", [("score", RawValue::from(1.0))])
        .unwrap();
    let tree = Predicate::all([
        Predicate::param("score", 1.0),
        Predicate::param("_id", RawValue::Null),
    ]);
    assert!(session.is_valid(&tree, leaf).await.unwrap());
}
