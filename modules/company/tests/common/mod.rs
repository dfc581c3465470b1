//! Shared helpers for company consumer tests
//!
//! Every test gets its own [`InMemoryBus`] and store, so they can run in
//! parallel.

use std::sync::Arc;
use std::time::Duration;

use company_rs::start_company_event_consumer;
use company_rs::store::InMemoryCompanyStore;
use event_bus::outbox::InMemoryOutbox;
use event_bus::{ConsumerConfig, ConsumerHandle, EventBus, InMemoryBus};

pub struct TestService {
    pub bus: Arc<InMemoryBus>,
    pub store: InMemoryCompanyStore,
    pub consumer: ConsumerHandle,
}

/// Company store ids start at 7 so assertions read like the saga walkthrough
pub async fn start_service() -> TestService {
    let bus = Arc::new(InMemoryBus::new());
    let store = InMemoryCompanyStore::starting_at(7, InMemoryOutbox::new());
    let consumer = start_company_event_consumer(
        bus.clone() as Arc<dyn EventBus>,
        Arc::new(store.clone()),
        ConsumerConfig { max_deliveries: 3 },
    )
    .await
    .expect("consumer should start");

    TestService { bus, store, consumer }
}

/// Poll `check` until it holds or two seconds pass
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Wait until the queue has nothing ready and nothing in flight
pub async fn wait_drained(bus: &InMemoryBus, queue: &str) {
    wait_until(|| bus.queue_depth(queue) == 0 && bus.in_flight(queue) == 0).await;
}
