//! The four job-fair services wired to one in-memory broker
//!
//! Each service gets its own store, queue and, where it stages events, its
//! own outbox relay. Only the broker and the databases are swapped for
//! in-process doubles.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use company_rs::store::InMemoryCompanyStore;
use event_bus::outbox::{InMemoryOutbox, OutboxRelay};
use event_bus::{ConsumerConfig, ConsumerHandle, EventBus, InMemoryBus, Publisher};
use identity_rs::store::InMemoryRegistrationStore;
use identity_rs::RegistrationEvents;
use jobs_rs::store::InMemoryCompanyMappingStore;
use jobs_rs::CompanyDirectory;
use profile_rs::store::InMemoryProfileStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const RELAY_POLL_INTERVAL: Duration = Duration::from_millis(10);

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub struct Platform {
    pub bus: Arc<InMemoryBus>,
    pub registrations: RegistrationEvents,
    pub identity_store: InMemoryRegistrationStore,
    pub company_store: InMemoryCompanyStore,
    pub mapping_store: InMemoryCompanyMappingStore,
    pub profile_store: InMemoryProfileStore,
    pub directory: CompanyDirectory,
    consumers: Vec<ConsumerHandle>,
    relays: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Platform {
    /// Start every service; the company store assigns ids from 7
    pub async fn start() -> Self {
        Self::start_with(ConsumerConfig::default()).await
    }

    pub async fn start_with(consumer_config: ConsumerConfig) -> Self {
        init_tracing();

        let bus = Arc::new(InMemoryBus::new());
        let shared: Arc<dyn EventBus> = bus.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let identity_store = InMemoryRegistrationStore::new(InMemoryOutbox::new());
        let registrations = RegistrationEvents::new(Arc::new(identity_store.clone()));

        let company_store = InMemoryCompanyStore::starting_at(7, InMemoryOutbox::new());
        let mapping_store = InMemoryCompanyMappingStore::new();
        let profile_store = InMemoryProfileStore::new();

        let consumers = vec![
            company_rs::start_company_event_consumer(
                shared.clone(),
                Arc::new(company_store.clone()),
                consumer_config.clone(),
            )
            .await
            .expect("company consumer"),
            jobs_rs::start_company_projection_consumer(
                shared.clone(),
                Arc::new(mapping_store.clone()),
                consumer_config.clone(),
            )
            .await
            .expect("jobs consumer"),
            profile_rs::start_user_event_consumer(
                shared.clone(),
                Arc::new(profile_store.clone()),
                consumer_config,
            )
            .await
            .expect("profile consumer"),
        ];

        let relays = [identity_store.outbox().clone(), company_store.outbox().clone()]
            .into_iter()
            .map(|outbox| {
                let relay = OutboxRelay::new(Arc::new(outbox), Publisher::new(shared.clone()))
                    .with_poll_interval(RELAY_POLL_INTERVAL);
                tokio::spawn(relay.run(shutdown_rx.clone()))
            })
            .collect();

        let directory = CompanyDirectory::new(Arc::new(mapping_store.clone()));

        Self {
            bus,
            registrations,
            identity_store,
            company_store,
            mapping_store,
            profile_store,
            directory,
            consumers,
            relays,
            shutdown,
        }
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.bus.clone())
    }

    /// Wait until nothing is staged, queued or in flight anywhere
    pub async fn settled(&self) {
        let queues = [
            company_rs::consumer::QUEUE,
            jobs_rs::consumer::QUEUE,
            profile_rs::consumer::QUEUE,
        ];
        wait_until(|| {
            self.identity_store.outbox().pending_count() == 0
                && self.company_store.outbox().pending_count() == 0
                && queues
                    .iter()
                    .all(|q| self.bus.queue_depth(q) == 0 && self.bus.in_flight(q) == 0)
        })
        .await;
    }

    pub fn dead_letters(&self) -> Vec<serde_json::Value> {
        self.bus
            .published("jobfair.dlq.>")
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).expect("dead letter is JSON"))
            .collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for consumer in self.consumers {
            consumer.close().await;
        }
        for relay in self.relays {
            relay.await.expect("relay task");
        }
    }
}

/// Poll `check` until it holds or three seconds pass
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
