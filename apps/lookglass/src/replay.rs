use std::io::BufRead;

use anyhow::{bail, Context, Result};
use lookglass_bridge::{BridgeResult, Channel, EnvelopeHandler};
use lookglass_replica::{Direction, Resolution, Store};
use lookglass_wire::{decode_envelope, Envelope};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// A channel whose inbound side is a recorded log. Outbound envelopes go
/// nowhere; they are logged and kept for inspection.
#[derive(Default)]
pub struct ReplayChannel {
    handler: Mutex<Option<EnvelopeHandler>>,
    sent: Mutex<Vec<Envelope>>,
}

impl ReplayChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands one recorded envelope to the listener. Returns false when no
    /// transport is listening yet.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(envelope);
                true
            }
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }
}

impl Channel for ReplayChannel {
    fn send(&self, envelope: &Envelope) -> BridgeResult<()> {
        match envelope {
            Envelope::Event(frame) => {
                debug!(target = "lookglass.replay", event = %frame.event_name, data = %frame.data, "outbound");
            }
            other => debug!(target = "lookglass.replay", kind = other.kind(), "outbound"),
        }
        self.sent.lock().push(envelope.clone());
        Ok(())
    }

    fn listen(&self, handler: EnvelopeHandler) {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            warn!(target = "lookglass.replay", "listen called twice; ignoring the new handler");
            return;
        }
        *slot = Some(handler);
    }
}

/// Reads one envelope per line. Blank lines are skipped.
pub fn read_envelopes(reader: impl BufRead) -> Result<Vec<Envelope>> {
    let mut envelopes = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope = decode_envelope(line.as_bytes()).with_context(|| format!("line {}", index + 1))?;
        envelopes.push(envelope);
    }
    Ok(envelopes)
}

pub fn parse_keys(keys: &[String]) -> Result<Vec<Direction>> {
    keys.iter()
        .map(|key| match Direction::parse(key) {
            Some(direction) => Ok(direction),
            None => bail!("unknown key `{key}`; expected up, down, left or right"),
        })
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct ReplayPlan {
    pub keys: Vec<Direction>,
    pub search: Option<String>,
}

/// Feeds the recording into the store, then applies the search and the
/// navigation keys in that order.
pub fn run(store: &Store, channel: &ReplayChannel, envelopes: Vec<Envelope>, plan: &ReplayPlan) -> Vec<Resolution> {
    let total = envelopes.len();
    for envelope in envelopes {
        if !channel.deliver(envelope) {
            warn!(target = "lookglass.replay", "no transport listening; replay stopped");
            break;
        }
    }
    info!(target = "lookglass.replay", envelopes = total, nodes = store.with_state(|state| state.len()), "replayed");

    if let Some(text) = &plan.search {
        store.change_search(text);
    }
    plan.keys
        .iter()
        .map(|direction| {
            let resolution = store.navigate(*direction);
            debug!(target = "lookglass.replay", ?direction, ?resolution, "key");
            resolution
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lookglass_bridge::{Transport, TransportConfig};
    use lookglass_replica::{ConnectionState, StoreConfig};
    use lookglass_wire::events;

    const LOG: &str = r#"
{"type":"many-events","events":[{"eventName":"mount","data":{"id":"app","kind":"Composite","name":"App","children":["a","b"]}},{"eventName":"mount","data":{"id":"a","kind":"Native","name":"A"}},{"eventName":"mount","data":{"id":"b","kind":"Native","name":"B"}},{"eventName":"root","data":"app"}]}

{"type":"event","eventName":"capabilities","data":{"inspect":true}}
"#;

    #[test]
    fn envelopes_are_read_line_by_line() {
        let envelopes = read_envelopes(LOG.as_bytes()).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert!(matches!(&envelopes[0], Envelope::ManyEvents { events } if events.len() == 4));

        let err = read_envelopes("{\"type\":\"event\"}\nnot json\n".as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("line 1"));
    }

    #[test]
    fn keys_parse_case_insensitively() {
        let keys = parse_keys(&["Down".into(), "right".into()]).unwrap();
        assert_eq!(keys, [Direction::Down, Direction::Right]);
        assert!(parse_keys(&["sideways".into()]).is_err());
    }

    #[test]
    fn replay_builds_the_replica_and_reports_selection() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let channel = Arc::new(ReplayChannel::new());
            let transport = Transport::new(channel.clone(), TransportConfig::default());
            let store = Store::new(transport, StoreConfig::default());
            let plan = ReplayPlan {
                keys: vec![Direction::Down, Direction::Down],
                search: None,
            };

            let resolutions = run(&store, &channel, read_envelopes(LOG.as_bytes()).unwrap(), &plan);
            assert_eq!(resolutions.len(), 2);
            assert_eq!(store.selected().as_deref(), Some("b"));
            assert!(matches!(store.connection(), ConnectionState::Connected(_)));

            let selected: Vec<_> = channel
                .sent()
                .into_iter()
                .filter_map(|envelope| match envelope {
                    Envelope::Event(frame) if frame.event_name == events::SELECTED => Some(frame.data),
                    _ => None,
                })
                .collect();
            assert_eq!(selected, [serde_json::json!("app"), serde_json::json!("a"), serde_json::json!("b")]);
        });
    }
}
