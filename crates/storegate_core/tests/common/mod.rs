#![allow(dead_code)]

use std::sync::Arc;
use storegate_core::{open_provider_in_memory, Column, Relation, SqliteProvider, TableSchema};

pub const ITEMS_DDL: &str = "CREATE TABLE items (
    id INTEGER PRIMARY KEY,
    t TEXT,
    f REAL,
    b INTEGER,
    counter INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);";

pub const LIBRARY_DDL: &str = "CREATE TABLE writers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE books (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    writer_id INTEGER NOT NULL REFERENCES writers(id) ON DELETE CASCADE
);";

pub const DOCS_DDL: &str = "CREATE TABLE docs (
    id INTEGER NOT NULL,
    tenant TEXT NOT NULL,
    body TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (id, tenant)
);";

pub fn items_schema() -> TableSchema {
    TableSchema::new(
        "items",
        [
            Column::text("t"),
            Column::real("f"),
            Column::boolean("b"),
            Column::integer("counter"),
        ],
    )
    .with_timestamps("created_at", "updated_at")
}

pub fn writers_schema() -> TableSchema {
    TableSchema::new("writers", [Column::text("name")])
}

pub fn books_relation() -> Relation {
    Relation::one_to_many(
        "books",
        TableSchema::new(
            "books",
            [Column::text("title"), Column::integer("writer_id")],
        ),
        "writer_id",
    )
}

pub fn docs_schema() -> TableSchema {
    TableSchema::new("docs", [Column::text("body")])
        .with_tenant("tenant")
        .with_timestamps("created_at", "updated_at")
}

pub fn memory_provider(ddl: &str) -> Arc<SqliteProvider> {
    let provider = open_provider_in_memory().unwrap();
    provider.apply_schema(ddl).unwrap();
    Arc::new(provider)
}
