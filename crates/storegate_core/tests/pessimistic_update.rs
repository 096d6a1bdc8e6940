mod common;

use common::{items_schema, ITEMS_DDL};
use std::sync::Arc;
use std::thread;
use storegate_core::{
    open_provider, Gateway, GatewayError, ProviderConfig, Record, RequestContext, SqlGateway,
    Value,
};

const WRITERS: i64 = 8;

#[test]
fn concurrent_locked_increments_lose_no_update() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ProviderConfig::file(dir.path().join("counter.db")).with_pool_size(2);
    config.busy_timeout_ms = 30_000;

    let provider = Arc::new(open_provider(&config).unwrap());
    provider.apply_schema(ITEMS_DDL).unwrap();
    let gateway = SqlGateway::new(Arc::clone(&provider), items_schema());
    let ctx = RequestContext::anonymous();

    let created = gateway
        .add(&ctx, Record::new().with("t", "counter").with("counter", 10))
        .unwrap();
    let id = created.get("id").cloned().unwrap();

    thread::scope(|scope| {
        for _ in 0..WRITERS {
            scope.spawn(|| {
                let ctx = RequestContext::anonymous();
                gateway
                    .update_transactional(&ctx, &id, &mut |current| {
                        let value = current
                            .get("counter")
                            .and_then(Value::as_i64)
                            .unwrap_or_default();
                        Ok(Record::new().with("counter", value + 1))
                    })
                    .unwrap();
            });
        }
    });

    let stored = gateway.get(&ctx, &id).unwrap().unwrap();
    assert_eq!(stored.get("counter"), Some(&Value::from(10 + WRITERS)));
}

#[test]
fn missing_row_fails_before_mutator_runs() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(open_provider(&ProviderConfig::file(dir.path().join("m.db"))).unwrap());
    provider.apply_schema(ITEMS_DDL).unwrap();
    let gateway = SqlGateway::new(provider, items_schema());

    let mut calls = 0;
    let error = gateway
        .update_transactional(&RequestContext::anonymous(), &Value::from(42), &mut |_| {
            calls += 1;
            Ok(Record::new())
        })
        .unwrap_err();

    assert!(matches!(error, GatewayError::DoesNotExist { .. }));
    assert_eq!(calls, 0);
}

#[test]
fn mutator_error_rolls_back_the_lock_scope() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(open_provider(&ProviderConfig::file(dir.path().join("r.db"))).unwrap());
    provider.apply_schema(ITEMS_DDL).unwrap();
    let gateway = SqlGateway::new(provider, items_schema());
    let ctx = RequestContext::anonymous();

    let created = gateway
        .add(&ctx, Record::new().with("counter", 1))
        .unwrap();
    let id = created.get("id").cloned().unwrap();

    let error = gateway
        .update_transactional(&ctx, &id, &mut |_| {
            Err(GatewayError::Conflict("caller gave up".to_string()))
        })
        .unwrap_err();
    assert!(matches!(error, GatewayError::Conflict(_)));

    let stored = gateway.get(&ctx, &id).unwrap().unwrap();
    assert_eq!(stored.get("updated_at"), created.get("updated_at"));
}
