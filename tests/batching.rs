//! Batch coordination: chunking to store caps, unprocessed propagation,
//! per-kind grouping, and failure aggregation.

mod support;

use entable::{EntityTypeNameRef, Error};
use serde_json::json;
use support::{attrs, dinosaur_definition, table, user_definition, DeferredSchema, InMemoryStore,
    TestSchema};

fn dino(i: usize) -> entable::Attributes {
    attrs(json!({
        "id": format!("dino-{i:03}"),
        "paleontologistId": "grant",
        "species": "T. rex",
        "diet": "carnivore",
    }))
}

#[test_log::test(tokio::test)]
async fn an_empty_batch_is_rejected() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store);

    let err = table.batch().execute().await.unwrap_err();
    assert!(matches!(err, Error::EmptyBatch));
}

#[test_log::test(tokio::test)]
async fn thirty_creates_issue_two_write_sub_batches() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let repo = table.entity(dinosaur_definition());

    let mut batch = table.batch();
    for i in 0..30 {
        repo.upsert(dino(i)).with_batch(&mut batch).unwrap();
    }
    let outcome = batch.execute().await.unwrap();

    assert_eq!(outcome.writes.processed, 30);
    assert!(outcome.writes.unprocessed.is_empty());
    assert!(outcome.errors.is_empty());
    assert_eq!(store.write_batch_sizes(), vec![25, 5]);
    assert_eq!(store.item_count(), 30);
}

#[test_log::test(tokio::test)]
async fn write_chunking_matches_the_store_caps_exactly() {
    for (writes, expected_batches) in [(25usize, 1usize), (26, 2), (50, 2), (51, 3)] {
        let store = InMemoryStore::new("pk", Some("sk"));
        let table = table(store.clone());
        let repo = table.entity(dinosaur_definition());

        let mut batch = table.batch();
        for i in 0..writes {
            repo.upsert(dino(i)).with_batch(&mut batch).unwrap();
        }
        let outcome = batch.execute().await.unwrap();

        assert_eq!(outcome.writes.processed, writes);
        assert_eq!(
            store.write_batch_sizes().len(),
            expected_batches,
            "{writes} writes should issue {expected_batches} sub-batches"
        );
    }
}

#[test_log::test(tokio::test)]
async fn unprocessed_writes_are_surfaced_and_resubmittable() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let repo = table.entity(dinosaur_definition());

    // The store accepts only 20 writes of each sub-batch.
    store.set_write_quota_per_batch(20);

    let mut batch = table.batch();
    for i in 0..30 {
        repo.upsert(dino(i)).with_batch(&mut batch).unwrap();
    }
    let outcome = batch.execute().await.unwrap();

    assert_eq!(outcome.writes.processed + outcome.writes.unprocessed.len(), 30);
    assert_eq!(outcome.writes.unprocessed.len(), 5);
    assert!(outcome.has_unprocessed());

    // Resubmitting the unprocessed work completes the batch.
    let retry = outcome.into_unprocessed(&table).unwrap();
    let outcome = retry.execute().await.unwrap();
    assert_eq!(outcome.writes.processed, 5);
    assert_eq!(store.item_count(), 30);
}

#[test_log::test(tokio::test)]
async fn unprocessed_reads_keep_their_kind_tags_on_resubmission() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let users = table.entity(user_definition());

    users
        .create(attrs(json!({"id": "alice", "status": "active"})))
        .execute()
        .await
        .unwrap();
    users
        .create(attrs(json!({"id": "bob", "status": "active"})))
        .execute()
        .await
        .unwrap();

    // The store reads only the first key of each sub-batch.
    store.set_get_quota_per_batch(1);

    let mut batch = table.batch();
    users
        .get(attrs(json!({"id": "alice"})))
        .with_batch(&mut batch)
        .unwrap();
    users
        .get(attrs(json!({"id": "bob"})))
        .with_batch(&mut batch)
        .unwrap();
    let outcome = batch.execute().await.unwrap();

    assert_eq!(outcome.reads.found, 1);
    assert_eq!(outcome.reads.unprocessed_keys.len(), 1);

    // The requeued get still carries its entity kind, so the retried
    // batch groups the result exactly as the original would have.
    let retry = outcome.into_unprocessed(&table).unwrap();
    let outcome = retry.execute().await.unwrap();

    assert_eq!(outcome.reads.found, 1);
    let user_items = outcome.reads.items_of(EntityTypeNameRef::from_str("User"));
    assert_eq!(user_items.len(), 1);
    assert_eq!(user_items[0]["id"], json!("bob"));
}

#[test_log::test(tokio::test)]
async fn mixed_batches_group_read_items_by_entity_kind() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let users = table.entity(user_definition());
    let dinos = table.entity(dinosaur_definition());

    users
        .create(attrs(json!({"id": "alice", "status": "active"})))
        .execute()
        .await
        .unwrap();

    let mut batch = table.batch();
    users
        .get(attrs(json!({"id": "alice"})))
        .with_batch(&mut batch)
        .unwrap();
    users
        .create(attrs(json!({"id": "bob", "status": "active"})))
        .with_batch(&mut batch)
        .unwrap();
    dinos.upsert(dino(1)).with_batch(&mut batch).unwrap();

    let outcome = batch.execute().await.unwrap();

    assert_eq!(outcome.writes.processed, 2);
    assert_eq!(outcome.reads.found, 1);
    let user_items = outcome.reads.items_of(EntityTypeNameRef::from_str("User"));
    assert_eq!(user_items.len(), 1);
    assert_eq!(user_items[0]["id"], json!("alice"));
    assert!(outcome
        .reads
        .items_of(EntityTypeNameRef::from_str("Dinosaur"))
        .is_empty());
}

#[test_log::test(tokio::test)]
async fn items_of_undeclared_kinds_stay_out_of_the_kind_buckets() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let users = table.entity(user_definition());

    users
        .create(attrs(json!({"id": "carol", "status": "active"})))
        .execute()
        .await
        .unwrap();

    // Reading the same key untagged leaves the item only in the flat list.
    let mut batch = table.batch();
    batch.add_get(attrs(json!({"pk": "USER#carol", "sk": "USER#carol"})));
    let outcome = batch.execute().await.unwrap();

    assert_eq!(outcome.reads.found, 1);
    assert_eq!(outcome.reads.items.len(), 1);
    assert!(outcome.reads.items_by_type.is_empty());
}

#[test_log::test(tokio::test)]
async fn reads_chunk_to_one_hundred_keys() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let repo = table.entity(dinosaur_definition());

    let mut seed = table.batch();
    for i in 0..120 {
        repo.upsert(dino(i)).with_batch(&mut seed).unwrap();
    }
    seed.execute().await.unwrap();

    let mut batch = table.batch();
    for i in 0..120 {
        repo.get(attrs(json!({"id": format!("dino-{i:03}")})))
            .with_batch(&mut batch)
            .unwrap();
    }
    let outcome = batch.execute().await.unwrap();

    assert_eq!(outcome.reads.found, 120);
    assert_eq!(store.get_batch_sizes(), vec![100, 20]);
}

#[test_log::test(tokio::test)]
async fn deferred_validators_are_rejected_on_the_batch_path() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let definition = entable::EntityDefinition::builder("Dinosaur")
        .schema(DeferredSchema::new(TestSchema::new().require("id")))
        .key_schema(TestSchema::new().require("id"))
        .primary_key(|v| {
            entable::keys::GeneratedKey::new(
                format!("DINOSAUR#{}", v.get("id")),
                format!("DINOSAUR#{}", v.get("id")),
            )
        })
        .build();
    let repo = table.entity(definition);

    let mut batch = table.batch();
    let err = repo
        .upsert(attrs(json!({"id": "deferred"})))
        .with_batch(&mut batch)
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedAsyncValidation));
    assert_eq!(batch.write_count(), 0);
}

#[test_log::test(tokio::test)]
async fn a_canceled_batch_reports_the_undispatched_work_as_unprocessed() {
    let store = InMemoryStore::new("pk", Some("sk"));
    let table = table(store.clone());
    let repo = table.entity(dinosaur_definition());

    let mut batch = table.batch();
    for i in 0..30 {
        repo.upsert(dino(i)).with_batch(&mut batch).unwrap();
    }

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let outcome = batch.execute_canceling(&token).await.unwrap();

    assert!(outcome.canceled);
    assert_eq!(outcome.writes.processed, 0);
    assert_eq!(outcome.writes.unprocessed.len(), 30);
    assert_eq!(store.item_count(), 0);
}
