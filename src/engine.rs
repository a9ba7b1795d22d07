//! Engine wiring: queues, registry, router, workers and ingestion.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::channels::{
    ApiForwarder, ApiTransport, EmailForwarder, EmailTransport, Forwarder, SmsForwarder,
    SmsTransport,
};
use crate::config::ForwarderConfig;
use crate::forward::queue::DEFAULT_DEAD_LETTER_CAPACITY;
use crate::forward::{
    Channel, ChannelQueues, DeadLetters, FailureRegistry, ForwardWorker, NotificationRouter,
    RetryPolicy, WorkerDeps,
};
use crate::pipeline::ingest::{Ingestor, spawn_ingestion};
use crate::pipeline::types::InboundSms;
use crate::store::MessageStore;

/// External collaborators the engine drives.
pub struct EngineDeps {
    pub store: Arc<dyn MessageStore>,
    pub sms: Arc<dyn SmsTransport>,
    pub email: Arc<dyn EmailTransport>,
    pub api: Arc<dyn ApiTransport>,
}

/// A running forwarding engine.
pub struct ForwardingEngine {
    inbound: mpsc::Sender<InboundSms>,
    registry: Arc<FailureRegistry>,
    dead_letters: Arc<DeadLetters>,
    handles: Vec<JoinHandle<()>>,
}

impl ForwardingEngine {
    /// Spawn the three forwarding workers and the ingestion task.
    pub fn start(config: &ForwarderConfig, deps: EngineDeps) -> Self {
        let (queues, mut receivers) =
            ChannelQueues::new(config.queue_capacity, |c| config.is_configured(c));
        let registry = Arc::new(FailureRegistry::new());
        let dead_letters = DeadLetters::new(DEFAULT_DEAD_LETTER_CAPACITY);
        let router = Arc::new(NotificationRouter::new(queues.clone(), Arc::clone(&registry)));

        let worker_deps = WorkerDeps {
            queues: queues.clone(),
            registry: Arc::clone(&registry),
            router,
            store: Arc::clone(&deps.store),
            dead_letters: Arc::clone(&dead_letters),
        };

        let forwarders: [Arc<dyn Forwarder>; 3] = [
            Arc::new(SmsForwarder::new(config.sms_recipients.clone(), deps.sms)),
            Arc::new(EmailForwarder::new(&config.email, deps.email)),
            Arc::new(ApiForwarder::new(
                config.api_providers.clone(),
                config.default_timeout(),
                deps.api,
            )),
        ];

        let mut handles = Vec::with_capacity(4);
        for forwarder in forwarders {
            let channel = forwarder.channel();
            let Some(rx) = receivers.take(channel) else {
                continue;
            };
            let policy = RetryPolicy {
                max_retries: config.max_retries_for(channel),
                backoff_unit: config.backoff_unit(),
            };
            handles.push(ForwardWorker::new(forwarder, policy, worker_deps.clone()).spawn(rx));
        }

        let (inbound, inbound_rx) = mpsc::channel(config.queue_capacity);
        let ingestor = Ingestor::new(
            deps.store,
            queues,
            Arc::clone(&dead_letters),
            config.fragment_ttl(),
        );
        handles.push(spawn_ingestion(ingestor, inbound_rx));

        info!(
            sms = config.is_configured(Channel::Sms),
            email = config.is_configured(Channel::Email),
            api = config.is_configured(Channel::Api),
            "Forwarding engine started"
        );

        Self {
            inbound,
            registry,
            dead_letters,
            handles,
        }
    }

    /// Sender for inbound modem events.
    pub fn inbound(&self) -> mpsc::Sender<InboundSms> {
        self.inbound.clone()
    }

    pub fn registry(&self) -> Arc<FailureRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn dead_letters(&self) -> Arc<DeadLetters> {
        Arc::clone(&self.dead_letters)
    }

    /// Abort all engine tasks. Queued items are dropped.
    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        info!("Forwarding engine stopped");
    }
}
