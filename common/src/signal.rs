use std::future::poll_fn;
use std::task::Poll;

use tokio::signal::unix::{signal, Signal, SignalKind};

/// Listens for a set of unix signals and yields whichever fires first.
/// Registration happens up front so a signal arriving between `recv` calls is
/// not lost.
pub struct SignalHandler {
    signals: Vec<(SignalKind, Signal)>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self {
            signals: Vec::new(),
        }
    }
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, kind: SignalKind) -> Self {
        if self.signals.iter().any(|(registered, _)| *registered == kind) {
            return self;
        }

        let listener = signal(kind).expect("failed to register signal handler");
        self.signals.push((kind, listener));

        self
    }

    /// Waits for any registered signal. Pends forever when nothing is
    /// registered, which keeps `select!` arms simple for callers.
    pub async fn recv(&mut self) -> SignalKind {
        let kind = poll_fn(|cx| {
            for (kind, listener) in self.signals.iter_mut() {
                if listener.poll_recv(cx).is_ready() {
                    return Poll::Ready(*kind);
                }
            }

            Poll::Pending
        })
        .await;

        tracing::debug!(?kind, "received signal");

        kind
    }
}
