use std::sync::Arc;
use std::time::Duration;

use event_bus::{ConsumerConfig, ConsumerHandle, Event, EventBus, InMemoryBus, Publisher};
use jobs_rs::consumer::QUEUE;
use jobs_rs::start_company_projection_consumer;
use jobs_rs::store::InMemoryCompanyMappingStore;

pub struct TestService {
    pub bus: Arc<InMemoryBus>,
    pub store: InMemoryCompanyMappingStore,
    pub consumer: ConsumerHandle,
}

impl TestService {
    pub async fn start() -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let store = InMemoryCompanyMappingStore::new();
        let consumer = start_company_projection_consumer(
            bus.clone() as Arc<dyn EventBus>,
            Arc::new(store.clone()),
            ConsumerConfig { max_deliveries: 3 },
        )
        .await
        .expect("consumer should start");

        Self { bus, store, consumer }
    }

    /// Publish events in order and wait until the queue has processed all of them
    pub async fn apply(&self, events: impl IntoIterator<Item = Event>) {
        let publisher = Publisher::new(self.bus.clone());
        for event in events {
            publisher.publish(event).await.expect("publish");
        }
        self.drained().await;
    }

    pub async fn drained(&self) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.bus.queue_depth(QUEUE) > 0 || self.bus.in_flight(QUEUE) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue did not drain in time");
    }

    pub fn dead_letters(&self) -> usize {
        self.bus.published("jobfair.dlq.>").len()
    }
}
