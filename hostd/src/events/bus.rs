//! Typed event bus
//!
//! Publishing never blocks: events go onto a queue drained by a single
//! [`Dispatcher`], which hands each event to every registered subscriber in
//! registration order before moving on to the next event. Once all
//! subscribers have seen an event it is mirrored to a broadcast channel for
//! passive observers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::errors::HostError;
use crate::events::Event;

/// Receives events from the dispatcher
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &Event) -> Result<(), HostError>;
}

/// Publishing side of the bus
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Event>,
    observers: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus and the dispatcher that drains it
    pub fn new() -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (observers, _) = broadcast::channel(256);
        let bus = Self {
            tx,
            observers: observers.clone(),
        };
        let dispatcher = Dispatcher {
            rx,
            observers,
            subscribers: Vec::new(),
        };
        (bus, dispatcher)
    }

    /// Queue an event for dispatch
    pub fn publish(&self, event: Event) {
        debug!(event = event.name(), "Publishing event");
        if let Err(e) = self.tx.send(event) {
            warn!("Event bus closed, dropping {}", e.0.name());
        }
    }

    /// Watch every event after its subscribers have handled it
    pub fn observe(&self) -> broadcast::Receiver<Event> {
        self.observers.subscribe()
    }
}

/// Delivers queued events to subscribers
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Event>,
    observers: broadcast::Sender<Event>,
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl Dispatcher {
    /// Register a subscriber; it sees events after all earlier registrations
    pub fn register(&mut self, subscriber: Arc<dyn Subscriber>) {
        info!("Registering event subscriber: {}", subscriber.name());
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_names(&self) -> Vec<&'static str> {
        self.subscribers.iter().map(|s| s.name()).collect()
    }

    /// Deliver one event to every subscriber. Subscriber errors are logged
    /// and do not stop delivery to the rest.
    pub async fn dispatch(&self, event: &Event) {
        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.handle(event).await {
                error!(
                    subscriber = subscriber.name(),
                    event = event.name(),
                    "Event subscriber failed: {}",
                    e
                );
            }
        }
        let _ = self.observers.send(event.clone());
    }

    /// Drain the queue until shutdown or until every publisher is gone
    pub async fn run(mut self, mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>) {
        info!("Event dispatcher starting...");

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Event dispatcher shutting down...");
                    return;
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(&event).await,
                        None => {
                            info!("Event bus closed, dispatcher exiting");
                            return;
                        }
                    }
                }
            }
        }
    }
}
