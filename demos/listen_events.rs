use std::error::Error;
use std::sync::Arc;

use secrecy::SecretString;
use stripe_listener::listener::client::{Listener, ListenerConfig};
use stripe_listener::listener::dispatch::EventHandler;
use stripe_listener::listener::proto::{EventPayload, V2Event, V2EventPayload, WebhookEvent};
use tokio_util::sync::CancellationToken;

struct PrintHandler;

impl EventHandler for PrintHandler {
    fn on_webhook_event(&self, _event: WebhookEvent, parsed: EventPayload) {
        println!("webhook event {} ({})", parsed.event_type, parsed.id);
    }

    fn on_v2_event(&self, _event: V2Event, parsed: V2EventPayload) {
        println!("v2 event {} ({})", parsed.event_type, parsed.id);
    }

    fn on_unknown_message(&self, raw_type: &str, _raw: &str) {
        println!("unknown message type {raw_type}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let api_key = std::env::var("STRIPE_API_KEY")
        .map_err(|_| "set STRIPE_API_KEY to a CLI secret key")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let config = ListenerConfig::new(SecretString::new(api_key), Arc::new(PrintHandler));
        let mut listener = Listener::new(config)?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        });

        println!("listening for events (Ctrl+C to stop)...");
        match listener.listen_all(cancel).await {
            Ok(()) | Err(stripe_listener::listener::client::ListenerError::Cancelled) => Ok(()),
            Err(err) => Err(err.into()),
        }
    })
}
