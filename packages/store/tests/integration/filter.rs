use chrono::NaiveDate;
use common::RawValue;
use sea_orm::sea_query::ExprTrait;
use store::query::operators::{any_of, between, clause, ge, gt, like, lt, ne};
use store::{EntityHandle, Filter, FindOptions, Predicate, Session, StoreError};

use crate::support::TestStore;

/// Three projects named "A", "B" and "AB", committed.
async fn three_projects(t: &TestStore) -> Vec<i32> {
    let mut session = t.session().await;
    let rows = [
        ("A", 1, 1.5, (2023, 5, 17)),
        ("B", 2, 2.5, (2023, 11, 2)),
        ("AB", 3, 3.5, (2024, 5, 17)),
    ];
    let mut handles = Vec::new();
    for (name, count, budget, (y, m, d)) in rows {
        let project = session
            .create_with(
                "Project",
                [
                    ("project", RawValue::from(name)),
                    ("count", RawValue::from(count)),
                    ("budget", RawValue::from(budget)),
                    (
                        "started",
                        RawValue::from(NaiveDate::from_ymd_opt(y, m, d).unwrap()),
                    ),
                ],
            )
            .unwrap();
        handles.push(project);
    }
    session.save(&handles).await.unwrap();
    let ids = handles
        .iter()
        .map(|h| session.id(*h).unwrap().unwrap())
        .collect();
    session.commit().await.unwrap();
    ids
}

fn ids(session: &Session, handles: &[EntityHandle]) -> Vec<i32> {
    handles
        .iter()
        .map(|h| session.id(*h).unwrap().unwrap())
        .collect()
}

#[tokio::test]
async fn strict_equality_and_like() {
    let t = TestStore::spawn().await;
    let all = three_projects(&t).await;
    let mut session = t.session().await;

    let found = session
        .find("Project", &Filter::new().with("project", "A"))
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[0]]);

    let found = session
        .find("Project", &Filter::new().with("project", like("A%")))
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[0], all[2]]);

    // a wildcard in a plain literal also means LIKE
    let found = session
        .find("Project", &Filter::new().with("project", "%B"))
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[1], all[2]]);
}

#[tokio::test]
async fn pattern_case_agrees_between_database_and_memory() {
    let t = TestStore::spawn().await;
    let all = three_projects(&t).await;
    let mut session = t.session().await;

    for (pattern, expected) in [("a%", vec![]), ("A%", vec![all[0], all[2]])] {
        let pushed = session
            .find("Project", &Filter::new().with("project", like(pattern)))
            .await
            .unwrap();
        assert_eq!(ids(&session, &pushed), expected, "database match of {pattern}");

        // ANY is never pushed down, so this runs in memory
        let residual = Predicate::entity(
            "Project",
            Predicate::any([Predicate::param("project", like(pattern))]),
        );
        let evaluated = session.find_complex(&residual).await.unwrap();
        assert_eq!(ids(&session, &evaluated), expected, "in-memory match of {pattern}");
    }

    let loose = session
        .find_with("Project", &Filter::new().with("project", "b"), FindOptions::substring())
        .await
        .unwrap();
    assert!(loose.is_empty());
    assert!(
        session
            .find("Project", &Filter::new().with("project", "a"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn substring_matching_is_a_call_option() {
    let t = TestStore::spawn().await;
    let all = three_projects(&t).await;
    let mut session = t.session().await;

    let filter = Filter::new().with("project", "B");
    let strict = session.find("Project", &filter).await.unwrap();
    assert_eq!(ids(&session, &strict), vec![all[1]]);

    let loose = session
        .find_with("Project", &filter, FindOptions::substring())
        .await
        .unwrap();
    assert_eq!(ids(&session, &loose), vec![all[1], all[2]]);
}

#[tokio::test]
async fn lists_and_comparisons() {
    let t = TestStore::spawn().await;
    let all = three_projects(&t).await;
    let mut session = t.session().await;

    let found = session
        .find("Project", &Filter::new().with("project", any_of(["A", "B"])))
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[0], all[1]]);

    let found = session
        .find("Project", &Filter::new().with("count", gt(1)))
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[1], all[2]]);

    let found = session
        .find(
            "Project",
            &Filter::new().with("count", ge(2)).with("budget", lt(3.0)),
        )
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[1]]);

    let found = session
        .find("Project", &Filter::new().with("budget", between(1.5, 2.5)))
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[0], all[1]]);

    let found = session
        .find("Project", &Filter::new().with("count", ne(2)))
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[0], all[2]]);
}

#[tokio::test]
async fn partial_dates_with_string_conversion() {
    let t = TestStore::spawn().await;
    let all = three_projects(&t).await;
    let mut session = t.session().await;
    let converting = FindOptions::converting();

    let found = session
        .find_with("Project", &Filter::new().with("started", "2023"), converting)
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[0], all[1]]);

    let found = session
        .find_with("Project", &Filter::new().with("started", "2024-05"), converting)
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[2]]);

    let found = session
        .find_with("Project", &Filter::new().with("started", "2023-11-02"), converting)
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[1]]);

    let found = session
        .find_with("Project", &Filter::new().with("count", "3"), converting)
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[2]]);

    // without conversion a string never matches a date parameter
    assert!(
        session
            .find("Project", &Filter::new().with("started", "2023"))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn unknown_parameter_is_rejected() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let err = session
        .find("Project", &Filter::new().with("nope", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownParameter { ref param, .. } if param == "nope"));

    assert!(matches!(
        session.find("Nothing", &Filter::new()).await,
        Err(StoreError::UnknownType(_))
    ));
}

#[tokio::test]
async fn attribute_keys() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let mid = session.create("Mid").unwrap();
    let inside = session.create("Leaf").unwrap();
    let outside = session.create("Leaf").unwrap();
    session.set_parent(inside, Some(mid)).await.unwrap();
    session.set_unique_id(outside, "leaf-outside").unwrap();
    session.save(&[mid, outside]).await.unwrap();
    let mid_id = session.id(mid).unwrap().unwrap();
    let outside_id = session.id(outside).unwrap().unwrap();

    let found = session
        .find("Leaf", &Filter::new().with("_parent_id", mid_id))
        .await
        .unwrap();
    assert_eq!(found, vec![inside]);

    let found = session
        .find("Leaf", &Filter::new().with("parent_id", RawValue::Null))
        .await
        .unwrap();
    assert_eq!(found, vec![outside]);

    let found = session
        .find("Leaf", &Filter::new().with("_id", outside_id))
        .await
        .unwrap();
    assert_eq!(found, vec![outside]);

    let found = session
        .find("Leaf", &Filter::new().with("_unique_id", "leaf-outside"))
        .await
        .unwrap();
    assert_eq!(found, vec![outside]);
    assert_eq!(
        session.find_by_unique_id("leaf-outside").await.unwrap(),
        Some(outside)
    );
}

#[tokio::test]
async fn custom_clause_receives_the_value_column() {
    let t = TestStore::spawn().await;
    let all = three_projects(&t).await;
    let mut session = t.session().await;

    let found = session
        .find(
            "Project",
            &Filter::new().with("count", clause(|column| column.clone().gt(1).and(column.lt(3)))),
        )
        .await
        .unwrap();
    assert_eq!(ids(&session, &found), vec![all[1]]);
}

#[tokio::test]
async fn search_sees_unsaved_changes() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let project = session
        .create_with("Project", [("project", RawValue::from("fresh"))])
        .unwrap();
    let found = session
        .find("Project", &Filter::new().with("project", "fresh"))
        .await
        .unwrap();
    assert_eq!(found, vec![project]);

    session.set_param(project, "project", "renamed").unwrap();
    assert!(
        session
            .find("Project", &Filter::new().with("project", "fresh"))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(session.find_first("Project", &Filter::new()).await.unwrap(), Some(project));
}

#[tokio::test]
async fn related_entities_through_attachments() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;

    let with_good = session.create("Project").unwrap();
    let with_bad = session.create("Project").unwrap();
    let good = session
        .create_with("Leaf", [("ok", RawValue::from(true))])
        .unwrap();
    let bad = session
        .create_with("Leaf", [("ok", RawValue::from(false))])
        .unwrap();
    session.attach(with_good, "uses", good).await.unwrap();
    session.attach(with_bad, "uses", bad).await.unwrap();

    let found = session
        .find_related("Project", "Leaf", &Filter::new().with("ok", true))
        .await
        .unwrap();
    assert_eq!(found, vec![with_good]);
}
