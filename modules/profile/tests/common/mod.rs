use std::sync::Arc;
use std::time::Duration;

use event_bus::{ConsumerConfig, ConsumerHandle, Event, EventBus, InMemoryBus, Publisher};
use profile_rs::consumer::QUEUE;
use profile_rs::start_user_event_consumer;
use profile_rs::store::InMemoryProfileStore;

pub struct TestService {
    pub bus: Arc<InMemoryBus>,
    pub store: InMemoryProfileStore,
    pub consumer: ConsumerHandle,
}

impl TestService {
    pub async fn start() -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let store = InMemoryProfileStore::new();
        let consumer = start_user_event_consumer(
            bus.clone() as Arc<dyn EventBus>,
            Arc::new(store.clone()),
            ConsumerConfig { max_deliveries: 3 },
        )
        .await
        .expect("consumer should start");

        Self { bus, store, consumer }
    }

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
