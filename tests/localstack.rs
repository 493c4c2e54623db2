//! End-to-end coverage of the DynamoDB-backed store client against a
//! local DynamoDB instance.

mod support;

use std::sync::Arc;

use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType, Projection,
    ProjectionType, ScalarAttributeType,
};
use entable::{store::dynamo::DynamoStoreClient, Table};
use serde_json::json;
use support::{attrs, dinosaur_definition};

async fn localstack_table(table_name: &str) -> (aws_sdk_dynamodb::Client, Table) {
    let config = aws_config::from_env()
        .endpoint_url("http://localhost:4566")
        .credentials_provider(aws_credential_types::Credentials::new(
            "test", "test", None, None, "static",
        ))
        .load()
        .await;
    let client = aws_sdk_dynamodb::Client::new(&config);

    let table = Table::builder(table_name, Arc::new(DynamoStoreClient::new(client.clone())))
        .partition_attr("pk")
        .sort_attr("sk")
        .build();
    (client, table)
}

fn string_attr(name: &str) -> AttributeDefinition {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .expect("attribute name and type are always provided")
}

fn hash_key(name: &str) -> KeySchemaElement {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(KeyType::Hash)
        .build()
        .expect("attribute name and key type are always provided")
}

fn range_key(name: &str) -> KeySchemaElement {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(KeyType::Range)
        .build()
        .expect("attribute name and key type are always provided")
}

#[test_log::test(tokio::test)]
#[ignore = "this test requires a local DynamoDB instance running on localhost:4566 and may be \
            slow"]
async fn localstack_round_trip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (client, table) = localstack_table("EntableRoundTrip").await;

    let _ = client
        .delete_table()
        .table_name(table.table_name())
        .send()
        .await;

    client
        .create_table()
        .table_name(table.table_name())
        .attribute_definitions(string_attr("pk"))
        .attribute_definitions(string_attr("sk"))
        .attribute_definitions(string_attr("gsi1pk"))
        .attribute_definitions(string_attr("gsi1sk"))
        .key_schema(hash_key("pk"))
        .key_schema(range_key("sk"))
        .global_secondary_indexes(
            GlobalSecondaryIndex::builder()
                .index_name("paleontologist-index")
                .key_schema(hash_key("gsi1pk"))
                .key_schema(range_key("gsi1sk"))
                .projection(
                    Projection::builder()
                        .projection_type(ProjectionType::All)
                        .build(),
                )
                .build()
                .expect("index name and key schema are always provided"),
        )
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await?;

    let repo = table.entity(dinosaur_definition());

    repo.create(attrs(json!({
        "id": "t-rex-123",
        "name": "Rexy",
        "paleontologistId": "grant",
        "species": "T. rex",
        "diet": "carnivore",
    })))
    .execute()
    .await?;

    let read = repo
        .get(attrs(json!({"id": "t-rex-123"})))
        .execute()
        .await?
        .expect("the created item should be readable");
    assert_eq!(read["name"], json!("Rexy"));

    let err = repo
        .create(attrs(json!({
            "id": "t-rex-123",
            "name": "impostor",
            "paleontologistId": "grant",
            "species": "T. rex",
            "diet": "carnivore",
        })))
        .execute()
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());

    repo.update(
        attrs(json!({"id": "t-rex-123"})),
        attrs(json!({"name": "T. Regina", "paleontologistId": "sattler"})),
    )
    .execute()
    .await?;

    let updated = repo
        .get(attrs(json!({"id": "t-rex-123"})))
        .include_indexes()
        .execute()
        .await?
        .expect("the updated item should be readable");
    assert_eq!(updated["name"], json!("T. Regina"));
    assert_eq!(updated["gsi1pk"], json!("PALEONTOLOGIST#sattler"));

    let mut batch = table.batch();
    for i in 0..30 {
        repo.upsert(attrs(json!({
            "id": format!("batch-{i:02}"),
            "paleontologistId": "grant",
            "species": "T. rex",
            "diet": "carnivore",
        })))
        .with_batch(&mut batch)?;
    }
    let outcome = batch.execute().await?;
    assert_eq!(outcome.writes.processed, 30);

    repo.delete(attrs(json!({"id": "t-rex-123"}))).execute().await?;
    let gone = repo.get(attrs(json!({"id": "t-rex-123"}))).execute().await?;
    assert!(gone.is_none());

    Ok(())
}
