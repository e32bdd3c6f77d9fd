// Integration test: two clients calling each other through an in-memory relay.
// Covers presence, reachability, offer/answer, candidate exchange, hang-up and re-call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use peercall::calls::{IceCandidate, MediaEngineError, SdpType, SessionDescription, SessionState};
use peercall::transport::{Transport, TransportEvent, TransportFactory};
use peercall::{CallClient, ClientConfig, Event, MediaEngine, MediaEvent};

const WAIT: Duration = Duration::from_secs(3);

// --- In-memory relay ---

/// Routes frames between registered users the way the signaling server does.
#[derive(Default)]
struct InMemoryRelay {
    users: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
    /// Every frame the relay received, as (sender, type).
    frames: Mutex<Vec<(String, String)>>,
}

impl InMemoryRelay {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn inbox(&self, name: &str) -> Option<mpsc::Sender<TransportEvent>> {
        self.users.lock().unwrap().get(name).cloned()
    }

    fn frames_from(&self, name: &str) -> Vec<String> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(sender, _)| sender == name)
            .map(|(_, kind)| kind.clone())
            .collect()
    }

    async fn wait_for_user(&self, name: &str) {
        timeout(WAIT, async {
            while self.inbox(name).is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("user registered with relay");
    }

    async fn deliver(&self, to: &str, frame: Value) {
        if let Some(inbox) = self.inbox(to) {
            let _ = inbox
                .send(TransportEvent::MessageReceived(frame.to_string()))
                .await;
        }
    }

    async fn handle(&self, own_inbox: &mpsc::Sender<TransportEvent>, text: &str) {
        let frame: Value = serde_json::from_str(text).unwrap();
        let name = frame["name"].as_str().unwrap_or_default().to_string();
        let target = frame["target"].as_str().unwrap_or_default().to_string();
        let kind = frame["type"].as_str().unwrap_or_default();
        self.frames.lock().unwrap().push((name.clone(), kind.to_string()));

        match kind {
            "store_user" => {
                self.users.lock().unwrap().insert(name, own_inbox.clone());
            }
            "start_call" => {
                let status = if self.inbox(&target).is_some() {
                    "user is ready for call"
                } else {
                    "user is not online"
                };
                let response = json!({ "type": "call_response", "data": status });
                let _ = own_inbox
                    .send(TransportEvent::MessageReceived(response.to_string()))
                    .await;
            }
            "create_offer" => {
                let sdp = frame["data"]["sdp"].clone();
                self.deliver(&target, json!({ "type": "offer_received", "name": name, "data": sdp }))
                    .await;
            }
            "create_answer" => {
                let sdp = frame["data"]["sdp"].clone();
                self.deliver(&target, json!({ "type": "answer_received", "name": name, "data": sdp }))
                    .await;
            }
            "ice_candidate" => {
                let data = frame["data"].clone();
                self.deliver(&target, json!({ "type": "ice_candidate", "name": name, "data": data }))
                    .await;
            }
            other => panic!("relay got unexpected frame type {other}"),
        }
    }
}

struct RelayTransport {
    relay: Arc<InMemoryRelay>,
    inbox: mpsc::Sender<TransportEvent>,
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        self.relay.handle(&self.inbox, text).await;
        Ok(())
    }

    async fn disconnect(&self) {
        let _ = self.inbox.send(TransportEvent::Disconnected).await;
    }
}

struct RelayTransportFactory {
    relay: Arc<InMemoryRelay>,
}

#[async_trait]
impl TransportFactory for RelayTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (inbox, events) = mpsc::channel(64);
        inbox.send(TransportEvent::Connected).await?;
        let transport = RelayTransport {
            relay: self.relay.clone(),
            inbox,
        };
        Ok((Arc::new(transport), events))
    }
}

// --- Fake media engine ---

/// Produces fixed descriptions and gathers two host candidates whenever a
/// local description is set.
struct FakeMedia {
    name: String,
    events: mpsc::Sender<MediaEvent>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    remote_description: Mutex<Option<SdpType>>,
}

impl FakeMedia {
    fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaEngine for FakeMedia {
    async fn create_offer(&self) -> Result<SessionDescription, MediaEngineError> {
        Ok(SessionDescription::offer(format!("v=0\r\ns={}-offer\r\n", self.name)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaEngineError> {
        Ok(SessionDescription::answer(format!("v=0\r\ns={}-answer\r\n", self.name)))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), MediaEngineError> {
        for n in 1..=2 {
            let candidate = IceCandidate::new(
                "0",
                0,
                format!("candidate:{n} 1 UDP 2130706431 {}.local {n}000 typ host", self.name),
            );
            let _ = self.events.send(MediaEvent::LocalCandidate(candidate)).await;
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaEngineError> {
        *self.remote_description.lock().unwrap() = Some(desc.sdp_type);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaEngineError> {
        self.remote_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), MediaEngineError> {
        self.remote_candidates.lock().unwrap().clear();
        *self.remote_description.lock().unwrap() = None;
        Ok(())
    }
}

// --- Helpers ---

struct Party {
    client: CallClient,
    events: broadcast::Receiver<Event>,
    media: Arc<FakeMedia>,
}

async fn join(relay: &Arc<InMemoryRelay>, name: &str) -> Party {
    let (media_tx, media_rx) = mpsc::channel(16);
    let media = Arc::new(FakeMedia {
        name: name.to_string(),
        events: media_tx,
        remote_candidates: Mutex::new(Vec::new()),
        remote_description: Mutex::new(None),
    });
    let factory = RelayTransportFactory {
        relay: relay.clone(),
    };
    let (client, mut events) =
        CallClient::connect(ClientConfig::new(name), &factory, media.clone(), media_rx)
            .await
            .unwrap();

    wait_for(&mut events, |e| matches!(e, Event::Connected)).await;
    relay.wait_for_user(name).await;
    Party {
        client,
        events,
        media,
    }
}

async fn wait_for(events: &mut broadcast::Receiver<Event>, want: impl Fn(&Event) -> bool) -> Event {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event bus open");
            if want(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event in time")
}

async fn wait_until(check: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

async fn connect_call(alice: &mut Party, bob: &mut Party) {
    alice.client.start_call("bob").await.unwrap();
    wait_for(&mut alice.events, |e| matches!(e, Event::CallProceeding { target } if target == "bob")).await;
    wait_for(&mut bob.events, |e| matches!(e, Event::IncomingCall { from } if from == "alice")).await;

    bob.client.accept().await.unwrap();
    wait_for(&mut bob.events, |e| matches!(e, Event::CallConnected { peer } if peer == "alice")).await;
    wait_for(&mut alice.events, |e| matches!(e, Event::CallConnected { peer } if peer == "bob")).await;
}

// --- Tests ---

#[tokio::test]
async fn test_full_call_between_two_clients() {
    let _ = env_logger::builder().is_test(true).try_init();
    let relay = InMemoryRelay::new();
    let mut alice = join(&relay, "alice").await;
    let mut bob = join(&relay, "bob").await;

    connect_call(&mut alice, &mut bob).await;

    assert_eq!(*alice.media.remote_description.lock().unwrap(), Some(SdpType::Answer));
    assert_eq!(*bob.media.remote_description.lock().unwrap(), Some(SdpType::Offer));

    // Each side ends up with the other side's two candidates.
    wait_until(|| bob.media.remote_candidates().len() == 2).await;
    wait_until(|| alice.media.remote_candidates().len() == 2).await;
    assert!(
        bob.media
            .remote_candidates()
            .iter()
            .all(|c| c.candidate.as_deref().is_some_and(|s| s.contains("alice.local")))
    );
    assert!(
        alice
            .media
            .remote_candidates()
            .iter()
            .all(|c| c.candidate.as_deref().is_some_and(|s| s.contains("bob.local")))
    );

    let snapshot = alice.client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.remote_identity.as_deref(), Some("bob"));

    alice.client.hang_up().await.unwrap();
    wait_for(&mut alice.events, |e| matches!(e, Event::CallEnded { peer, .. } if peer == "bob")).await;
    bob.client.hang_up().await.unwrap();
    wait_for(&mut bob.events, |e| matches!(e, Event::CallEnded { peer, .. } if peer == "alice")).await;

    let snapshot = alice.client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.remote_identity, None);

    // The same clients can call again.
    connect_call(&mut alice, &mut bob).await;
    wait_until(|| bob.media.remote_candidates().len() == 2).await;

    alice.client.shutdown().await;
    bob.client.shutdown().await;
}

#[tokio::test]
async fn test_calling_an_offline_user() {
    let _ = env_logger::builder().is_test(true).try_init();
    let relay = InMemoryRelay::new();
    let mut alice = join(&relay, "alice").await;

    alice.client.start_call("ghost").await.unwrap();
    wait_for(&mut alice.events, |e| matches!(e, Event::PeerUnreachable { target } if target == "ghost")).await;

    let snapshot = alice.client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.remote_identity, None);
    assert_eq!(snapshot.awaiting_response_from, None);

    // Only the reachability check went out; no offer or candidates followed it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.frames_from("alice"), vec!["store_user", "start_call"]);

    // Once bob shows up the call goes through.
    let mut bob = join(&relay, "bob").await;
    connect_call(&mut alice, &mut bob).await;
}

#[tokio::test]
async fn test_rejected_call_leaves_caller_waiting_for_answer() {
    let _ = env_logger::builder().is_test(true).try_init();
    let relay = InMemoryRelay::new();
    let mut alice = join(&relay, "alice").await;
    let mut bob = join(&relay, "bob").await;

    alice.client.start_call("bob").await.unwrap();
    wait_for(&mut bob.events, |e| matches!(e, Event::IncomingCall { .. })).await;
    bob.client.reject().await.unwrap();

    // Nothing tells the caller; it stays on its offer until it hangs up.
    let snapshot = alice.client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::OfferPending);
    assert!(bob.media.remote_candidates().is_empty());

    alice.client.hang_up().await.unwrap();
    wait_for(&mut alice.events, |e| matches!(e, Event::CallEnded { .. })).await;
    assert_eq!(alice.client.snapshot().await.unwrap().state, SessionState::Idle);
}
