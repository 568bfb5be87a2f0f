use common::{ParameterKind, RawValue, TypeSchema};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use store::entity::parameter_declaration;
use store::{Store, StoreError};

use crate::support::{TestStore, project_schema};

#[tokio::test]
async fn registering_twice_is_idempotent() {
    let mut t = TestStore::spawn().await;
    let again = t.store.register(project_schema()).await.unwrap();
    assert_eq!(again, t.types.project);

    let rows = parameter_declaration::Entity::find()
        .filter(parameter_declaration::Column::EntityName.eq(again.as_str()))
        .count(t.store.connection())
        .await
        .unwrap();
    assert_eq!(rows, project_schema().params().len() as u64);
    assert!(t.store.is_consistent(&project_schema()).await.unwrap());
}

#[tokio::test]
async fn changed_schema_gets_its_own_identity() {
    let mut t = TestStore::spawn().await;
    let changed = project_schema()
        .with_param("owner", ParameterKind::String)
        .unwrap();
    let identity = t.store.register(changed).await.unwrap();

    assert_ne!(identity, t.types.project);
    assert!(identity.starts_with("Project_"));

    // the bare name is now ambiguous, the identities are not
    let mut session = t.store.begin().await.unwrap();
    assert!(matches!(
        session.create("Project"),
        Err(StoreError::AmbiguousType { ref candidates, .. }) if candidates.len() == 2
    ));
    let entity = session.create(&identity).unwrap();
    session.set_param(entity, "owner", "someone").unwrap();
    let old = session.create(&t.types.project).unwrap();
    assert!(session.set_param(old, "owner", "someone").is_err());
}

#[tokio::test]
async fn types_reload_from_the_database() {
    let t = TestStore::spawn().await;
    {
        let mut session = t.session().await;
        let node = session
            .create_with("Node", [("A", RawValue::from("x"))])
            .unwrap();
        session.save(&[node]).await.unwrap();
        session.commit().await.unwrap();
    }

    let db = store::database::init_db(&t.database_config()).await.unwrap();
    let mut fresh = Store::new(db, t.store.data_config());
    assert!(fresh.registry().is_empty());
    assert_eq!(fresh.register_from_db().await.unwrap(), 4);
    assert!(fresh.registry().get(&t.types.mid).is_some());
    assert!(fresh.registry().get(&t.types.leaf).is_some());

    let (identity, schema) = fresh.registry().entity_by_name("Node").unwrap();
    assert_eq!(identity, t.types.node);
    assert_eq!(schema.kind_of("n"), Some(ParameterKind::Integer));

    let mut session = fresh.begin().await.unwrap();
    let nodes = session.find_all("Node").await.unwrap();
    assert_eq!(nodes.len(), 1);
}

#[tokio::test]
async fn mismatched_definition_is_not_consistent() {
    let t = TestStore::spawn().await;
    let other = TypeSchema::new("Project")
        .and_then(|s| s.with_param("project", ParameterKind::Integer))
        .unwrap();
    assert!(!t.store.is_consistent(&other).await.unwrap());
}

#[tokio::test]
async fn types_without_parameters_are_recorded() {
    let mut t = TestStore::spawn().await;
    let tag = TypeSchema::new("Tag").unwrap();
    assert!(!t.store.is_consistent(&tag).await.unwrap());

    let identity = t.store.register(tag.clone()).await.unwrap();
    t.store.register(tag.clone()).await.unwrap();
    assert!(t.store.is_consistent(&tag).await.unwrap());
    {
        let mut session = t.session().await;
        let entity = session.create("Tag").unwrap();
        session.save(&[entity]).await.unwrap();
        session.commit().await.unwrap();
    }

    let db = store::database::init_db(&t.database_config()).await.unwrap();
    let mut fresh = Store::new(db, t.store.data_config());
    assert_eq!(fresh.register_from_db().await.unwrap(), 5);
    let (found, schema) = fresh.registry().entity_by_name("Tag").unwrap();
    assert_eq!(found, identity);
    assert!(schema.params().is_empty());

    let mut session = fresh.begin().await.unwrap();
    assert_eq!(session.find_roots(Some("Tag")).await.unwrap().len(), 1);
}
