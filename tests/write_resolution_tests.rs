// ==================== Write Resolution Tests ====================

mod common;

use bson::{doc, Bson};
use common::{recording_executor, seeded_executor, Call};
use docpipe::{
    compile_write, Field, Filter, Join, Method, Query, QueryOutcome, QueryValue, UpdateData,
    WriteCommand, WritePlan,
};

fn team_join() -> Join {
    Join::inner(
        "teams",
        Field::id().in_schema("teams"),
        Field::new("team_id").in_schema("users"),
    )
}

#[tokio::test]
async fn test_direct_update_skips_resolution() {
    let (store, executor) = recording_executor();
    let query = Query::update("users")
        .filter(Filter::eq(Field::new("name"), "Cy"))
        .set_data(UpdateData::new().set("age", 26));

    let outcome = executor.update(&query).await.unwrap();
    assert_eq!((outcome.matched, outcome.modified), (1, 1));
    assert_eq!(
        store.calls(),
        vec![Call::UpdateMany {
            collection: "users".to_string(),
            filter: doc! { "name": { "$eq": "Cy" } },
            update: doc! { "$set": { "age": 26 } },
        }]
    );
}

#[tokio::test]
async fn test_joined_update_resolves_ids_first() {
    let (store, executor) = recording_executor();
    let query = Query::update("users")
        .join(team_join())
        .filter(Filter::eq(Field::new("name").in_schema("teams"), "core"))
        .set_data(UpdateData::add_to_set().set("tags", vec!["a", "b"]));

    let outcome = executor.update(&query).await.unwrap();
    assert_eq!(outcome.matched, 2);
    // Bob (3) already had "a"; Ada gains both tags
    assert_eq!(outcome.modified, 2);

    let calls = store.calls();
    assert_eq!(calls.len(), 2);
    match &calls[0] {
        Call::Aggregate {
            collection,
            pipeline,
        } => {
            assert_eq!(collection, "users");
            assert_eq!(pipeline.last(), Some(&doc! { "$project": { "_id": 1 } }));
            assert!(pipeline[0].contains_key("$lookup"));
        }
        other => panic!("Expected the resolution read first, got {:?}", other),
    }
    assert_eq!(
        calls[1],
        Call::UpdateMany {
            collection: "users".to_string(),
            filter: doc! { "_id": { "$in": [1, 3] } },
            update: doc! { "$addToSet": { "tags": { "$each": ["a", "b"] } } },
        }
    );

    let users = store.inner.documents("users");
    assert_eq!(
        users[0].get_array("tags").unwrap(),
        &vec![Bson::from("x"), Bson::from("a"), Bson::from("b")]
    );
    assert_eq!(
        users[2].get_array("tags").unwrap(),
        &vec![Bson::from("a"), Bson::from("b")]
    );
}

#[tokio::test]
async fn test_field_comparison_delete_resolves_ids() {
    let (store, executor) = recording_executor();
    let query = Query::delete("users").filter(Filter::fields(
        Field::new("spent"),
        Method::GREATER_THAN,
        Field::new("budget"),
    ));

    let command = compile_write(&query).unwrap();
    assert!(command.plan().requires_resolution());

    let deleted = executor.delete(&query).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(
        store.calls().last(),
        Some(&Call::DeleteMany {
            collection: "users".to_string(),
            filter: doc! { "_id": { "$in": [1] } },
        })
    );
    assert_eq!(store.inner.documents("users").len(), 3);
}

#[tokio::test]
async fn test_no_match_still_issues_write() {
    let (store, executor) = recording_executor();
    let query = Query::delete("users")
        .join(team_join())
        .filter(Filter::eq(Field::new("name").in_schema("teams"), "nobody"));

    assert_eq!(executor.delete(&query).await.unwrap(), 0);
    assert_eq!(
        store.calls().last(),
        Some(&Call::DeleteMany {
            collection: "users".to_string(),
            filter: doc! { "_id": { "$in": [] } },
        })
    );
}

#[tokio::test]
async fn test_unset_and_set_null() {
    let (store, executor) = seeded_executor();
    let query = Query::update("users")
        .filter(Filter::eq(Field::id(), 4))
        .set_data(
            UpdateData::new()
                .unset("budget")
                .set_or_unset("spent", QueryValue::Null)
                .set_if_present("name", QueryValue::Null),
        );

    let command = compile_write(&query).unwrap();
    match &command {
        WriteCommand::Update { plan, update, .. } => {
            assert_eq!(
                plan,
                &WritePlan::Direct {
                    filter: doc! { "_id": { "$eq": 4 } }
                }
            );
            assert_eq!(
                update,
                &Some(doc! { "$unset": { "budget": null, "spent": null } })
            );
        }
        other => panic!("Expected update, got {:?}", other),
    }

    executor.update(&query).await.unwrap();
    assert_eq!(store.documents("users")[3], doc! { "_id": 4, "name": "Cy", "age": 25 });
}

#[tokio::test]
async fn test_custom_update_is_merged() {
    let (store, executor) = seeded_executor();
    let query = Query::update("users")
        .filter(Filter::eq(Field::id(), 2))
        .set_data(UpdateData::new().set("name", "Rob"))
        .custom_update(doc! { "$inc": { "age": 1 } });

    executor.update(&query).await.unwrap();
    let bob = &store.documents("users")[1];
    assert_eq!(bob.get_str("name").unwrap(), "Rob");
    assert_eq!(bob.get_i32("age").unwrap(), 18);
}

#[tokio::test]
async fn test_execute_dispatches_on_action() {
    let (_, executor) = seeded_executor();
    let outcome = executor
        .execute(&Query::delete("orders").filter(Filter::eq(Field::new("status"), "open")))
        .await
        .unwrap();
    assert_eq!(outcome, QueryOutcome::Deleted(1));

    let outcome = executor
        .execute(
            &Query::update("orders")
                .filter(Filter::eq(Field::new("status"), "paid"))
                .set_data(UpdateData::new().set("status", "shipped")),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        QueryOutcome::Updated {
            matched: 2,
            modified: 2
        }
    );
}

#[tokio::test]
async fn test_update_rejects_delete_queries() {
    let (_, executor) = seeded_executor();
    let err = executor.update(&Query::delete("users")).await.unwrap_err();
    assert!(err.is_syntax());
}
