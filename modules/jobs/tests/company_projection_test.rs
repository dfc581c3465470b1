//! Projection behaviour of the job service consumer
//!
//! Run with: cargo test --package jobs-rs --test company_projection_test

mod common;

use common::TestService;
use event_bus::{
    CompanyChange, CompanyDeleted, CompanyRegistered, CompanyUpdated, Event, EventBus, EventEnvelope,
};

fn registered(user_id: i64, company_id: Option<i64>, name: &str) -> Event {
    Event::CompanyRegistered(CompanyRegistered {
        user_id,
        company_id,
        company_name: name.to_string(),
        ..Default::default()
    })
}

fn updated(user_id: i64, changes: Vec<CompanyChange>) -> Event {
    Event::CompanyUpdated(CompanyUpdated { user_id, changes })
}

fn deleted(user_id: i64) -> Event {
    Event::CompanyDeleted(CompanyDeleted { user_id })
}

#[tokio::test]
async fn origin_registration_without_company_id_is_ignored() {
    let svc = TestService::start().await;
    svc.apply([registered(42, None, "Acme")]).await;

    assert!(svc.store.is_empty());
    assert_eq!(svc.dead_letters(), 0);
    svc.consumer.close().await;
}

#[tokio::test]
async fn enriched_registration_creates_mapping() {
    let svc = TestService::start().await;
    svc.apply([registered(42, None, "Acme"), registered(42, Some(7), "Acme")]).await;

    let mapping = svc.store.get(42).expect("mapping should exist");
    assert_eq!(mapping.company_id, 7);
    assert_eq!(mapping.company_name, "Acme");
    svc.consumer.close().await;
}

#[tokio::test]
async fn applying_the_same_registration_twice_is_idempotent() {
    let svc = TestService::start().await;
    svc.apply([registered(42, Some(7), "Acme")]).await;
    let once = svc.store.get(42).unwrap();

    svc.apply([registered(42, Some(7), "Acme")]).await;
    let twice = svc.store.get(42).unwrap();

    assert_eq!(once, twice);
    assert_eq!(svc.store.len(), 1);
    svc.consumer.close().await;
}

#[tokio::test]
async fn redelivered_identical_envelope_leaves_row_unchanged() {
    let svc = TestService::start().await;
    let envelope = registered(42, Some(7), "Acme").into_envelope();
    let body = serde_json::to_vec(&envelope).unwrap();

    svc.bus
        .publish("jobfair.events.company.registered", body.clone())
        .await
        .unwrap();
    svc.drained().await;
    let once = svc.store.get(42).expect("mapping should exist");

    svc.bus
        .publish("jobfair.events.company.registered", body)
        .await
        .unwrap();
    svc.drained().await;

    assert_eq!(svc.store.get(42), Some(once));
    assert_eq!(svc.store.len(), 1);
    assert_eq!(svc.dead_letters(), 0);
    svc.consumer.close().await;
}

#[tokio::test]
async fn link_without_company_id_creates_no_mapping() {
    let svc = TestService::start().await;
    svc.apply([updated(
        42,
        vec![CompanyChange::Linked { company_id: 0, company_name: String::new() }],
    )])
    .await;

    assert!(svc.store.get(42).is_none());
    assert_eq!(svc.dead_letters(), 0);
    svc.consumer.close().await;
}

#[tokio::test]
async fn late_origin_copy_does_not_erase_mapping() {
    let svc = TestService::start().await;
    svc.apply([registered(42, Some(7), "Acme"), registered(42, None, "Acme")]).await;

    assert_eq!(svc.store.get(42).unwrap().company_id, 7);
    svc.consumer.close().await;
}

#[tokio::test]
async fn update_for_unmapped_user_creates_nothing() {
    let svc = TestService::start().await;
    svc.apply([updated(
        42,
        vec![CompanyChange::Renamed { company_name: "Acme Inc".into() }],
    )])
    .await;

    assert!(svc.store.is_empty());
    assert_eq!(svc.dead_letters(), 0);
    svc.consumer.close().await;
}

#[tokio::test]
async fn rename_refreshes_cached_name_and_link_repairs_mapping() {
    let svc = TestService::start().await;
    svc.apply([
        registered(42, Some(7), "Acme"),
        updated(
            42,
            vec![
                CompanyChange::LogoChanged { logo_url: "https://cdn.test/a.png".into() },
                CompanyChange::Renamed { company_name: "Acme Inc".into() },
            ],
        ),
    ])
    .await;

    let mapping = svc.store.get(42).unwrap();
    assert_eq!((mapping.company_id, mapping.company_name.as_str()), (7, "Acme Inc"));

    svc.apply([updated(
        43,
        vec![CompanyChange::Linked { company_id: 8, company_name: "Globex".into() }],
    )])
    .await;
    assert_eq!(svc.store.get(43).unwrap().company_id, 8);
    svc.consumer.close().await;
}

#[tokio::test]
async fn delete_then_duplicate_delete_leaves_mapping_absent() {
    let svc = TestService::start().await;
    svc.apply([registered(42, Some(7), "Acme"), deleted(42), deleted(42)]).await;

    assert!(svc.store.get(42).is_none());
    assert_eq!(svc.dead_letters(), 0);
    svc.consumer.close().await;
}

#[tokio::test]
async fn store_failure_is_retried_by_redelivery() {
    let svc = TestService::start().await;
    svc.store.fail_next(1);
    svc.apply([registered(42, Some(7), "Acme")]).await;

    assert_eq!(svc.store.get(42).unwrap().company_id, 7);
    assert_eq!(svc.dead_letters(), 0);
    svc.consumer.close().await;
}

#[tokio::test]
async fn unknown_event_type_is_acked_and_loop_keeps_running() {
    let svc = TestService::start().await;

    let archived = EventEnvelope::new(
        "company.archived",
        serde_json::json!({ "user_id": 42 }),
    );
    svc.bus
        .publish(
            "jobfair.events.company.archived",
            serde_json::to_vec(&archived).unwrap(),
        )
        .await
        .unwrap();
    svc.drained().await;
    assert!(svc.store.is_empty());

    svc.apply([registered(42, Some(7), "Acme")]).await;
    assert_eq!(svc.store.get(42).unwrap().company_id, 7);
    assert_eq!(svc.dead_letters(), 0);
    svc.consumer.close().await;
}
