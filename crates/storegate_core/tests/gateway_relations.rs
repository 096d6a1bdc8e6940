mod common;

use common::{books_relation, memory_provider, writers_schema, LIBRARY_DDL};
use std::sync::Arc;
use storegate_core::{
    Column, Filter, Gateway, GatewayError, Record, RequestContext, SqlGateway,
    SqliteProvider, TableSchema, Value,
};

struct Library {
    writers: SqlGateway<SqliteProvider>,
    books: SqlGateway<SqliteProvider>,
}

fn library() -> Library {
    let provider = memory_provider(LIBRARY_DDL);
    Library {
        writers: SqlGateway::new(Arc::clone(&provider), writers_schema())
            .with_relation(books_relation()),
        books: SqlGateway::new(
            provider,
            TableSchema::new(
                "books",
                [Column::text("title"), Column::integer("writer_id")],
            ),
        ),
    }
}

fn titles(children: &[Record]) -> Vec<String> {
    children
        .iter()
        .filter_map(|child| child.get("title").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn book(title: &str) -> Record {
    Record::new().with("title", title)
}

#[test]
fn add_fans_out_embedded_children_and_reads_attach_them() {
    let library = library();
    let ctx = RequestContext::anonymous();

    let writer = library
        .writers
        .add(
            &ctx,
            Record::new()
                .with("name", "Le Guin")
                .with("books", vec![book("Earthsea"), book("The Dispossessed")]),
        )
        .unwrap();
    let children = writer.get("books").and_then(Value::as_related).unwrap();
    assert_eq!(titles(children), vec!["Earthsea", "The Dispossessed"]);
    assert!(children
        .iter()
        .all(|child| child.get("writer_id") == writer.get("id")));

    let loaded = library
        .writers
        .get(&ctx, writer.get("id").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(loaded, writer);
}

#[test]
fn set_related_updates_adds_and_removes_only_what_changed() {
    let library = library();
    let ctx = RequestContext::anonymous();

    let writer = library
        .writers
        .add(
            &ctx,
            Record::new()
                .with("name", "Herbert")
                .with("books", vec![book("A"), book("B")]),
        )
        .unwrap();
    let bystander = library
        .writers
        .add(
            &ctx,
            Record::new()
                .with("name", "Butler")
                .with("books", vec![book("Kindred")]),
        )
        .unwrap();

    let current = writer.get("books").and_then(Value::as_related).unwrap();
    let a_id = current[0].get("id").cloned().unwrap();
    let b_id = current[1].get("id").cloned().unwrap();

    let synced = library
        .writers
        .set_related(
            &ctx,
            writer.get("id").unwrap(),
            "books",
            vec![
                Record::new().with("id", a_id.clone()).with("title", "A (revised)"),
                book("C"),
            ],
        )
        .unwrap();

    assert_eq!(titles(&synced), vec!["A (revised)", "C"]);
    assert_eq!(synced[0].get("id"), Some(&a_id));
    assert!(library.books.get(&ctx, &b_id).unwrap().is_none());

    let untouched = library
        .books
        .filter(
            &ctx,
            &[Filter::eq("writer_id", bystander.get("id").cloned().unwrap())],
            None,
        )
        .unwrap();
    assert_eq!(titles(&untouched), vec!["Kindred"]);
    assert_eq!(library.books.count(&ctx, &[]).unwrap(), 3);
}

#[test]
fn get_related_groups_children_of_many_parents() {
    let library = library();
    let ctx = RequestContext::anonymous();

    let first = library
        .writers
        .add(
            &ctx,
            Record::new()
                .with("name", "One")
                .with("books", vec![book("x"), book("y")]),
        )
        .unwrap();
    let second = library
        .writers
        .add(&ctx, Record::new().with("name", "Two"))
        .unwrap();

    let ids = [
        first.get("id").cloned().unwrap(),
        second.get("id").cloned().unwrap(),
    ];
    let grouped = library.writers.get_related(&ctx, "books", &ids).unwrap();

    let first_key = ids[0].key().unwrap();
    assert_eq!(titles(&grouped[&first_key]), vec!["x", "y"]);
    assert!(!grouped.contains_key(&ids[1].key().unwrap()));

    let listed = library.writers.filter(&ctx, &[], None).unwrap();
    let childless = listed
        .iter()
        .find(|writer| writer.get("id").and_then(Value::key) == ids[1].key())
        .unwrap();
    assert_eq!(
        childless.get("books").and_then(Value::as_related),
        Some(&[][..])
    );
}

#[test]
fn failing_child_write_rolls_back_parent() {
    let library = library();
    let ctx = RequestContext::anonymous();

    let error = library
        .writers
        .add(
            &ctx,
            Record::new()
                .with("name", "Partial")
                .with("books", vec![book("fine"), Record::new()]),
        )
        .unwrap_err();
    assert!(matches!(error, GatewayError::Storage(_)));

    assert_eq!(library.writers.count(&ctx, &[]).unwrap(), 0);
    assert_eq!(library.books.count(&ctx, &[]).unwrap(), 0);
}

#[test]
fn update_with_relation_payload_replaces_children() {
    let library = library();
    let ctx = RequestContext::anonymous();
    let writer = library
        .writers
        .add(
            &ctx,
            Record::new()
                .with("name", "Leckie")
                .with("books", vec![book("Justice")]),
        )
        .unwrap();

    let updated = library
        .writers
        .update(
            &ctx,
            Record::new()
                .with("id", writer.get("id").cloned().unwrap())
                .with("books", Vec::<Record>::new()),
            None,
        )
        .unwrap();
    assert_eq!(
        updated.get("books").and_then(Value::as_related),
        Some(&[][..])
    );
    assert_eq!(updated.get("name"), Some(&Value::from("Leckie")));
    assert_eq!(library.books.count(&ctx, &[]).unwrap(), 0);
}

#[test]
fn relation_errors_are_reported() {
    let library = library();
    let ctx = RequestContext::anonymous();

    let missing_parent = library
        .writers
        .set_related(&ctx, &Value::from(404), "books", vec![book("orphan")])
        .unwrap_err();
    assert!(matches!(missing_parent, GatewayError::DoesNotExist { .. }));

    let unknown_field = library
        .writers
        .get_related(&ctx, "essays", &[Value::from(1)])
        .unwrap_err();
    assert!(matches!(unknown_field, GatewayError::Contract(_)));

    let malformed = library
        .writers
        .add(&ctx, Record::new().with("name", "Bad").with("books", "not a list"))
        .unwrap_err();
    assert!(matches!(malformed, GatewayError::Contract(_)));
}
