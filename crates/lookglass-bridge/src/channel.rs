use std::sync::Arc;

use bytes::Bytes;
use lookglass_wire::{decode_envelope, encode_envelope, Envelope};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{BridgeError, BridgeResult};

pub type EnvelopeHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// An ordered, reliable, bidirectional envelope pipe. Delivery guarantees are
/// the implementation's business; the transport layered on top assumes them.
pub trait Channel: Send + Sync {
    fn send(&self, envelope: &Envelope) -> BridgeResult<()>;
    /// Installs the handler for inbound envelopes. Channels accept one.
    fn listen(&self, handler: EnvelopeHandler);
}

/// One end of an in-process channel. Envelopes cross as encoded JSON, so both
/// ends exercise the same codec a socket would.
pub struct LocalChannel {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LocalChannel {
    /// Two connected ends. Envelopes sent before the far end listens are
    /// buffered.
    pub fn pair() -> (LocalChannel, LocalChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::end(a_tx, b_rx), Self::end(b_tx, a_rx))
    }

    fn end(outbound: mpsc::UnboundedSender<Bytes>, inbound: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(Some(inbound)),
            pump: Mutex::new(None),
        }
    }
}

impl Channel for LocalChannel {
    fn send(&self, envelope: &Envelope) -> BridgeResult<()> {
        let bytes = encode_envelope(envelope)?;
        self.outbound
            .send(Bytes::from(bytes))
            .map_err(|_| BridgeError::Closed)
    }

    fn listen(&self, handler: EnvelopeHandler) {
        let Some(mut rx) = self.inbound.lock().take() else {
            warn!(target = "lookglass.channel", "listen called twice; ignoring the new handler");
            return;
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(target = "lookglass.channel", error = %err, "listen needs a tokio runtime");
                *self.inbound.lock() = Some(rx);
                return;
            }
        };
        let handle = runtime.spawn(async move {
            while let Some(bytes) = rx.recv().await {
                match decode_envelope(&bytes) {
                    Ok(envelope) => handler(envelope),
                    Err(err) => {
                        warn!(target = "lookglass.channel", error = %err, "dropping undecodable envelope");
                    }
                }
            }
            debug!(target = "lookglass.channel", "peer closed");
        });
        *self.pump.lock() = Some(handle);
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookglass_wire::EventFrame;
    use serde_json::json;

    #[test_timeout::tokio_timeout_test(5)]
    async fn envelopes_sent_before_listen_are_buffered_in_order() {
        let (left, right) = LocalChannel::pair();
        for n in 0..3 {
            left.send(&Envelope::Event(EventFrame {
                event_name: format!("e{n}"),
                data: json!(n),
                cleaned: Vec::new(),
            }))
            .expect("send");
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        right.listen(Arc::new(move |envelope| {
            let _ = tx.send(envelope);
        }));
        for n in 0..3 {
            match rx.recv().await.expect("delivered") {
                Envelope::Event(frame) => assert_eq!(frame.event_name, format!("e{n}")),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn sending_to_a_dropped_peer_reports_closed() {
        let (left, right) = LocalChannel::pair();
        drop(right);
        let err = left.send(&Envelope::Pause).expect_err("peer gone");
        assert!(matches!(err, BridgeError::Closed));
    }
}
