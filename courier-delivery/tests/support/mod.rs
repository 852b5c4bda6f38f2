//! Test support utilities for delivery pipeline tests
//!
//! Provides scripted providers whose behaviour is fixed per call, and a
//! harness that runs an initialised [`DeliveryProcessor`] on the test runtime.
#![allow(dead_code, clippy::unwrap_used)] // Not every test uses every helper

pub mod scripted;

use std::sync::Arc;

use courier_common::{Message, Signal};
use courier_delivery::{DeliveryError, DeliveryProcessor, Provider};
use tokio::{sync::broadcast, task::JoinHandle};

pub use scripted::{ScriptedProvider, Step};

/// Processor configuration with deterministic backoff (100ms, 200ms, 400ms ...)
pub fn processor(max_retries: u32) -> DeliveryProcessor {
    ron::from_str(&format!(
        "(max_retries: {max_retries}, backoff: (jitter: false))"
    ))
    .unwrap()
}

pub fn message(subject: &str) -> Message {
    Message::new("user@example.com", subject, "Body")
}

/// A processor served on a background task
pub struct Harness {
    pub processor: Arc<DeliveryProcessor>,
    shutdown: broadcast::Sender<Signal>,
    worker: JoinHandle<Result<(), DeliveryError>>,
}

impl Harness {
    pub fn start(mut processor: DeliveryProcessor, providers: Vec<Arc<dyn Provider>>) -> Self {
        processor.init(providers).unwrap();
        let processor = Arc::new(processor);
        let (shutdown, receiver) = broadcast::channel(4);

        let worker = tokio::spawn({
            let processor = Arc::clone(&processor);
            async move { processor.serve(receiver).await }
        });

        Self {
            processor,
            shutdown,
            worker,
        }
    }

    pub async fn shutdown(self) {
        self.shutdown.send(Signal::Shutdown).unwrap();
        self.worker.await.unwrap().unwrap();
    }
}
