use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use store::entity::{data, data_chunk};
use store::{BoxReader, PayloadStore, StoreError};

use crate::support::{CHUNK_SIZE, TestStore};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn whole_chunks_round_trip_and_check_out() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();

    let bytes = payload(CHUNK_SIZE * 5);
    let store = session.data(leaf).await.unwrap();
    assert_eq!(store.put("raw", &bytes).await.unwrap(), bytes.len() as u64);

    store.check_consistency("raw").await.unwrap();
    assert_eq!(store.size("raw").await.unwrap(), (CHUNK_SIZE * 5) as u64);
    assert_eq!(store.chunk_indices("raw").await.unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(store.get("raw").await.unwrap(), bytes);
}

#[tokio::test]
async fn missing_middle_chunk_is_detected() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();
    session
        .data(leaf)
        .await
        .unwrap()
        .put("raw", &payload(CHUNK_SIZE * 3))
        .await
        .unwrap();
    let entity_id = session.id(leaf).unwrap().unwrap();

    let record = data::Entity::find()
        .filter(data::Column::EntityId.eq(entity_id))
        .filter(data::Column::Key.eq("raw"))
        .one(session.connection())
        .await
        .unwrap()
        .expect("payload record");
    data_chunk::Entity::delete_many()
        .filter(data_chunk::Column::DataId.eq(record.id))
        .filter(data_chunk::Column::ChunkIndex.eq(2))
        .exec(session.connection())
        .await
        .unwrap();

    let store = session.data(leaf).await.unwrap();
    assert!(matches!(
        store.check_consistency("raw").await,
        Err(StoreError::DataInconsistency(_))
    ));
    // reading never repairs
    assert_eq!(store.chunk_count("raw").await.unwrap(), 2);
}

#[tokio::test]
async fn put_replaces_previous_chunks() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();
    let store = session.data(leaf).await.unwrap();

    store.put("raw", &payload(CHUNK_SIZE * 4 + 1)).await.unwrap();
    assert_eq!(store.chunk_count("raw").await.unwrap(), 5);

    let short = b"abc".to_vec();
    store.put("raw", &short).await.unwrap();
    assert_eq!(store.chunk_count("raw").await.unwrap(), 1);
    assert_eq!(store.get("raw").await.unwrap(), short);
    assert_eq!(store.length("raw").await.unwrap(), Some(3));
    store.check_consistency("raw").await.unwrap();
}

#[tokio::test]
async fn streams_in_and_out() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();
    let store = session.data(leaf).await.unwrap();

    let bytes = payload(CHUNK_SIZE * 3 + 2);
    let reader: BoxReader = Box::new(std::io::Cursor::new(bytes.clone()));
    assert_eq!(store.put_stream("stream", reader).await.unwrap(), bytes.len() as u64);
    assert_eq!(store.chunk_count("stream").await.unwrap(), 4);

    let mut sink = Vec::new();
    let written = store.get_stream("stream", &mut sink).await.unwrap();
    assert_eq!(written, bytes.len() as u64);
    assert_eq!(sink, bytes);

    // a reader may borrow its source
    let borrowed: BoxReader<'_> = Box::new(&bytes[CHUNK_SIZE..]);
    assert_eq!(
        store.put_stream("stream", borrowed).await.unwrap(),
        (bytes.len() - CHUNK_SIZE) as u64
    );
    assert_eq!(store.get("stream").await.unwrap(), &bytes[CHUNK_SIZE..]);
    assert_eq!(store.chunk_count("stream").await.unwrap(), 3);
}

#[tokio::test]
async fn empty_payload_has_no_chunks() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();
    let store = session.data(leaf).await.unwrap();

    assert_eq!(store.put("empty", &[]).await.unwrap(), 0);
    assert!(store.contains("empty").await.unwrap());
    assert_eq!(store.size("empty").await.unwrap(), 0);
    assert!(store.get("empty").await.unwrap().is_empty());
    store.check_consistency("empty").await.unwrap();
}

#[tokio::test]
async fn keys_mimetype_and_delete() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();
    let store = session.data(leaf).await.unwrap();

    store.put("b", b"1").await.unwrap();
    store.put("a", b"2").await.unwrap();
    assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);

    store.set_mimetype("a", Some("text/plain")).await.unwrap();
    assert_eq!(store.mimetype("a").await.unwrap().as_deref(), Some("text/plain"));
    // the mimetype is independent of the chunks
    assert_eq!(store.get("a").await.unwrap(), b"2");

    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());
    assert!(!store.contains("a").await.unwrap());
    assert!(matches!(store.get("a").await, Err(StoreError::NotFound(_))));
    assert_eq!(store.keys().await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn clear_keeps_the_record() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();
    let store = session.data(leaf).await.unwrap();

    store.put("raw", &payload(10)).await.unwrap();
    store.set_mimetype("raw", Some("application/octet-stream")).await.unwrap();
    store.clear("raw").await.unwrap();

    assert!(store.contains("raw").await.unwrap());
    assert_eq!(store.chunk_count("raw").await.unwrap(), 0);
    assert_eq!(store.length("raw").await.unwrap(), None);
    assert_eq!(
        store.mimetype("raw").await.unwrap().as_deref(),
        Some("application/octet-stream")
    );
}

#[tokio::test]
async fn copy_to_another_entity() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let source = session.create("Leaf").unwrap();
    let target = session.create("Leaf").unwrap();
    session.save(&[source, target]).await.unwrap();
    let target_id = session.id(target).unwrap().unwrap();

    let bytes = payload(CHUNK_SIZE * 2 + 3);
    {
        let store = session.data(source).await.unwrap();
        store.put("raw", &bytes).await.unwrap();
        store.set_mimetype("raw", Some("image/png")).await.unwrap();
        assert_eq!(store.copy_to("raw", target_id, "copy").await.unwrap(), bytes.len() as u64);
    }

    let store = session.data(target).await.unwrap();
    assert_eq!(store.get("copy").await.unwrap(), bytes);
    assert_eq!(store.mimetype("copy").await.unwrap().as_deref(), Some("image/png"));
    store.check_consistency("copy").await.unwrap();
}

#[tokio::test]
async fn payloads_of_deleted_entities_are_removed() {
    let t = TestStore::spawn().await;
    let mut session = t.session().await;
    let leaf = session.create("Leaf").unwrap();
    session.data(leaf).await.unwrap().put("raw", &payload(9)).await.unwrap();

    session.delete(leaf).await.unwrap();
    let remaining = data_chunk::Entity::find()
        .all(session.connection())
        .await
        .unwrap();
    assert!(remaining.is_empty());
    assert!(matches!(session.data(leaf).await, Err(StoreError::StaleObject(_))));
}
