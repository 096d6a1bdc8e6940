mod common;

use common::{items_schema, memory_provider, writers_schema, ITEMS_DDL, LIBRARY_DDL};
use std::sync::Arc;
use serde_json::json;
use storegate_core::{
    Column, Comparison, Filter, Gateway, GatewayError, PageOptions, Record, RequestContext,
    SqlGateway, SqliteProvider, TableSchema, Value,
};

fn items_gateway() -> SqlGateway<SqliteProvider> {
    SqlGateway::new(memory_provider(ITEMS_DDL), items_schema())
}

fn id_of(record: &Record) -> Value {
    record.get("id").cloned().unwrap()
}

#[test]
fn add_update_and_stale_update_scenario() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();

    let created = gateway
        .add(
            &ctx,
            Record::new().with("t", "foo").with("f", 1.23).with("b", true),
        )
        .unwrap();
    assert!(matches!(created.get("id"), Some(Value::Integer(_))));
    assert_eq!(created.get("b"), Some(&Value::Bool(true)));
    assert_eq!(created.get("f"), Some(&Value::Real(1.23)));
    assert_eq!(created.get("created_at"), created.get("updated_at"));
    let stale = created.get("updated_at").cloned().unwrap();

    let updated = gateway
        .update(
            &ctx,
            Record::new().with("id", id_of(&created)).with("t", "bar"),
            None,
        )
        .unwrap();
    assert_eq!(updated.get("t"), Some(&Value::from("bar")));
    assert!(
        updated.get("updated_at").and_then(Value::as_i64)
            > updated.get("created_at").and_then(Value::as_i64)
    );
    assert_eq!(updated.get("f"), Some(&Value::Real(1.23)));

    let error = gateway
        .update(
            &ctx,
            Record::new().with("id", id_of(&created)).with("t", "baz"),
            Some(&stale),
        )
        .unwrap_err();
    assert!(matches!(error, GatewayError::Conflict(_)));
    assert!(error.is_recoverable());

    let current = gateway.get(&ctx, &id_of(&created)).unwrap().unwrap();
    assert_eq!(current.get("t"), Some(&Value::from("bar")));
}

#[test]
fn remove_is_idempotent() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();
    let created = gateway.add(&ctx, Record::new().with("t", "gone")).unwrap();
    let id = id_of(&created);

    assert!(gateway.remove(&ctx, &id).unwrap());
    assert!(!gateway.remove(&ctx, &id).unwrap());
    assert!(gateway.get(&ctx, &id).unwrap().is_none());
}

#[test]
fn repeated_upserts_converge_to_last_payload() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();

    let first = gateway
        .upsert(
            &ctx,
            Record::new()
                .with("id", 10)
                .with("t", "a")
                .with("f", 1.0)
                .with("counter", 5),
        )
        .unwrap();
    let second = gateway
        .upsert(&ctx, Record::new().with("id", 10).with("t", "b"))
        .unwrap();

    let stored = gateway.get(&ctx, &Value::from(10)).unwrap().unwrap();
    assert_eq!(stored, second);
    assert_eq!(stored.get("t"), Some(&Value::from("b")));
    assert_eq!(stored.get("f"), Some(&Value::Null));
    assert_eq!(stored.get("counter"), Some(&Value::from(0)));
    assert_eq!(stored.get("created_at"), first.get("created_at"));
    assert!(
        stored.get("updated_at").and_then(Value::as_i64)
            > first.get("updated_at").and_then(Value::as_i64)
    );
    assert_eq!(gateway.count(&ctx, &[]).unwrap(), 1);
}

#[test]
fn upsert_without_id_adds_a_row() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();

    let created = gateway.upsert(&ctx, Record::new().with("t", "new")).unwrap();
    assert!(matches!(created.get("id"), Some(Value::Integer(_))));
    assert_eq!(gateway.count(&ctx, &[]).unwrap(), 1);
}

#[test]
fn optimistic_update_rejects_writer_holding_stale_timestamp() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();
    let created = gateway.add(&ctx, Record::new().with("t", "base")).unwrap();
    let id = id_of(&created);
    let t0 = created.get("updated_at").cloned().unwrap();

    let by_a = gateway
        .update(&ctx, Record::new().with("id", id.clone()).with("t", "a"), Some(&t0))
        .unwrap();
    assert!(by_a.get("updated_at").and_then(Value::as_i64) > t0.as_i64());

    let by_b = gateway.update(
        &ctx,
        Record::new().with("id", id.clone()).with("t", "b"),
        Some(&t0),
    );
    assert!(matches!(by_b, Err(GatewayError::Conflict(_))));

    let current = gateway.get(&ctx, &id).unwrap().unwrap();
    assert_eq!(current.get("t"), Some(&Value::from("a")));
}

#[test]
fn updating_missing_row_is_does_not_exist() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();

    let plain = gateway
        .update(&ctx, Record::new().with("id", 999).with("t", "x"), None)
        .unwrap_err();
    assert!(matches!(
        plain,
        GatewayError::DoesNotExist { ref entity, id: Some(Value::Integer(999)) } if entity == "items"
    ));

    let conditional = gateway
        .update(
            &ctx,
            Record::new().with("id", 999).with("t", "x"),
            Some(&Value::from(1)),
        )
        .unwrap_err();
    assert!(matches!(conditional, GatewayError::DoesNotExist { .. }));
}

#[test]
fn update_without_id_is_a_contract_violation() {
    let gateway = items_gateway();
    let error = gateway
        .update(
            &RequestContext::anonymous(),
            Record::new().with("t", "x"),
            None,
        )
        .unwrap_err();
    assert!(matches!(error, GatewayError::Contract(_)));
    assert!(!error.is_recoverable());
}

#[test]
fn pagination_reports_filtered_total_and_cursor() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();
    for index in 0..5 {
        gateway
            .add(
                &ctx,
                Record::new()
                    .with("t", format!("i{index}"))
                    .with("counter", index),
            )
            .unwrap();
    }

    let short = gateway
        .paginate(&ctx, &[], &PageOptions::new(10).unwrap())
        .unwrap();
    assert_eq!(short.total, 5);
    assert_eq!(short.len(), 5);
    assert_eq!(short.next_cursor, None);

    let first = gateway
        .paginate(&ctx, &[], &PageOptions::new(2).unwrap())
        .unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.len(), 2);
    assert_eq!(first.limit, Some(2));
    assert_eq!(first.offset, Some(0));
    let cursor = first.next_cursor.clone().unwrap();
    assert_eq!(cursor, id_of(&first.items[1]));

    let second = gateway
        .paginate(&ctx, &[], &PageOptions::new(2).unwrap().after(cursor.clone()).unwrap())
        .unwrap();
    assert_eq!(second.total, 5);
    assert_eq!(second.offset, None);
    assert!(second
        .items
        .iter()
        .all(|item| item.get("id").and_then(Value::as_i64) > cursor.as_i64()));

    let tail = gateway
        .paginate(
            &ctx,
            &[],
            &PageOptions::new(2).unwrap().with_offset(4).unwrap(),
        )
        .unwrap();
    assert_eq!(tail.total, 5);
    assert_eq!(tail.len(), 1);

    let filtered = gateway
        .paginate(
            &ctx,
            &[Filter::compare("counter", Comparison::Gte, vec![Value::from(3)]).unwrap()],
            &PageOptions::new(1).unwrap().order_by("counter", false),
        )
        .unwrap();
    assert_eq!(filtered.total, 2);
    assert_eq!(filtered.items[0].get("counter"), Some(&Value::from(4)));
}

#[test]
fn count_exists_and_filter_semantics() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();
    gateway.add(&ctx, Record::new().with("t", "a")).unwrap();
    gateway.add(&ctx, Record::new().with("t", "b")).unwrap();
    gateway.add(&ctx, Record::new()).unwrap();

    let a_or_b = Filter::new("t", vec![Value::from("a"), Value::from("b")]);
    assert_eq!(gateway.count(&ctx, &[a_or_b]).unwrap(), 2);

    let with_null = Filter::new("t", vec![Value::from("a"), Value::Null]);
    assert_eq!(gateway.filter(&ctx, &[with_null], None).unwrap().len(), 2);

    assert!(!gateway
        .exists(&ctx, &[Filter::eq("t", "missing")])
        .unwrap());
    assert!(gateway.exists(&ctx, &[Filter::eq("t", "a")]).unwrap());
    assert!(gateway
        .filter(&ctx, &[Filter::eq("unknown_column", 1)], None)
        .unwrap()
        .is_empty());
    assert!(gateway
        .filter(&ctx, &[Filter::new("t", Vec::new())], None)
        .unwrap()
        .is_empty());
}

#[test]
fn returned_records_are_owned_copies() {
    let gateway = items_gateway();
    let ctx = RequestContext::anonymous();
    let created = gateway.add(&ctx, Record::new().with("t", "orig")).unwrap();

    let mut fetched = gateway.get(&ctx, &id_of(&created)).unwrap().unwrap();
    fetched.insert("t", "mutated locally");

    let again = gateway.get(&ctx, &id_of(&created)).unwrap().unwrap();
    assert_eq!(again.get("t"), Some(&Value::from("orig")));
}

#[test]
fn unique_violation_is_already_exists_with_enriched_value() {
    let provider = memory_provider(LIBRARY_DDL);
    let writers = SqlGateway::new(Arc::clone(&provider), writers_schema());
    let ctx = RequestContext::anonymous();

    writers
        .add(&ctx, Record::new().with("name", "Le Guin"))
        .unwrap();
    let error = writers
        .add(&ctx, Record::new().with("name", "Le Guin"))
        .unwrap_err();

    assert!(matches!(
        error,
        GatewayError::AlreadyExists {
            key: Some(ref key),
            value: Some(Value::Text(ref value)),
        } if key == "name" && value == "Le Guin"
    ));
    assert_eq!(writers.count(&ctx, &[]).unwrap(), 1);
}

#[test]
fn json_column_round_trips_strings_and_arrays() {
    let provider = memory_provider("CREATE TABLE cfg (id INTEGER PRIMARY KEY, meta TEXT);");
    let gateway = SqlGateway::new(provider, TableSchema::new("cfg", [Column::json("meta")]));
    let ctx = RequestContext::anonymous();

    for (payload, expected) in [
        (r#"{"meta": "hello"}"#, json!("hello")),
        (r#"{"meta": [{"k": 1}]}"#, json!([{ "k": 1 }])),
        (r#"{"meta": []}"#, json!([])),
    ] {
        let record: Record = serde_json::from_str(payload).unwrap();
        let created = gateway.add(&ctx, record).unwrap();
        assert_eq!(created.get("meta"), Some(&Value::Json(expected.clone())));

        let loaded = gateway.get(&ctx, &id_of(&created)).unwrap().unwrap();
        assert_eq!(loaded.get("meta"), Some(&Value::Json(expected)));
    }

    let matched = gateway
        .filter(&ctx, &[Filter::eq("meta", "hello")], None)
        .unwrap();
    assert_eq!(matched.len(), 1);

    let first = matched[0].clone();
    let updated = gateway
        .update(
            &ctx,
            Record::new()
                .with("id", id_of(&first))
                .with("meta", vec![Record::new().with("k", 2)]),
            None,
        )
        .unwrap();
    assert_eq!(updated.get("meta"), Some(&Value::Json(json!([{ "k": 2 }]))));
}
