use std::sync::{Arc, LazyLock};

use anyhow::Context;
use courier_common::{SendRequest, Signal, internal, logging, tracing};
use courier_delivery::{
    DeliveryProcessor, DeliveryStats, MockProvider, MockProviderConfig, Provider,
};
use serde::Deserialize;
use tokio::sync::broadcast;

/// Top-level configuration and entry point of the service
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    delivery: DeliveryProcessor,
    /// Providers to deliver through, in order of preference
    #[serde(default)]
    providers: Vec<MockProviderConfig>,
    /// Messages to deliver on startup
    #[serde(default)]
    outbox: Vec<SendRequest>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

impl Courier {
    pub fn providers(&self) -> &[MockProviderConfig] {
        &self.providers
    }

    pub fn outbox(&self) -> &[SendRequest] {
        &self.outbox
    }

    /// Run the service until the outbox has been delivered or a shutdown
    /// signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery processor cannot be initialised or
    /// stops unexpectedly.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let signals = tokio::spawn(async {
            if let Err(error) = shutdown().await {
                tracing::error!(error = %error, "Failed to handle shutdown signal");
            }
        });

        let result = self.execute(&SHUTDOWN_BROADCAST).await;
        signals.abort();

        internal!("Shutting down...");

        result.map(|_| ())
    }

    /// Serve the delivery processor, deliver every message in the outbox,
    /// then broadcast [`Signal::Shutdown`] on `shutdown`
    ///
    /// A shutdown broadcast from elsewhere stops the processor early; outbox
    /// messages not yet processed are then reported as undelivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery processor cannot be initialised or
    /// stops unexpectedly.
    pub async fn execute(
        mut self,
        shutdown: &broadcast::Sender<Signal>,
    ) -> anyhow::Result<DeliveryStats> {
        let providers: Vec<Arc<dyn Provider>> = self
            .providers
            .iter()
            .map(|config| Arc::new(MockProvider::from(config)) as Arc<dyn Provider>)
            .collect();

        self.delivery
            .init(providers)
            .context("Failed to initialise delivery processor")?;

        let processor = Arc::new(self.delivery);
        let server = tokio::spawn({
            let processor = Arc::clone(&processor);
            let receiver = shutdown.subscribe();
            async move { processor.serve(receiver).await }
        });

        let pending: Vec<_> = self
            .outbox
            .into_iter()
            .map(|request| processor.submit(request))
            .collect();

        for result in futures_util::future::join_all(pending).await {
            match result {
                Ok(outcome) => internal!(
                    level = INFO,
                    provider = %outcome.provider,
                    success = outcome.success,
                    attempts = outcome.attempts,
                    "{}",
                    outcome.message
                ),
                Err(error) => tracing::warn!(error = %error, "Message not delivered"),
            }
        }

        let stats = processor.get_stats();
        internal!(
            level = INFO,
            total = stats.total,
            success = stats.success,
            failure = stats.failure,
            per_provider = ?stats.per_provider,
            "Delivery statistics"
        );

        // Nobody else may be listening, in which case there is nothing to stop
        let _ = shutdown.send(Signal::Shutdown);

        server
            .await
            .context("Delivery processor task failed")?
            .context("Delivery processor stopped with an error")?;

        Ok(stats)
    }
}
