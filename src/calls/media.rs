//! Media engine collaborator interface.
//!
//! The media stack (codecs, packet transport, NAT traversal, capture and
//! rendering) is external. The call layer drives it through [`MediaEngine`]
//! and listens to it through a stream of [`MediaEvent`]s.

use async_trait::async_trait;

use super::envelope::{IceCandidate, SessionDescription};
use super::error::MediaEngineError;

/// Operations the signaling layer needs from the underlying media session.
///
/// One engine instance backs the whole lifetime of a client. `close` resets
/// the current connection so that the next call can reuse the same engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaEngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaEngineError>;

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), MediaEngineError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), MediaEngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaEngineError>;

    async fn close(&self) -> Result<(), MediaEngineError>;

    /// Attach capture sources and render sinks before negotiation starts.
    async fn start_local_media(&self) -> Result<(), MediaEngineError> {
        Ok(())
    }

    async fn set_audio_enabled(&self, _enabled: bool) -> Result<(), MediaEngineError> {
        Ok(())
    }

    async fn set_video_enabled(&self, _enabled: bool) -> Result<(), MediaEngineError> {
        Ok(())
    }

    async fn switch_camera(&self) -> Result<(), MediaEngineError> {
        Ok(())
    }
}

/// Events raised by the media engine on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A new local connectivity candidate was gathered.
    LocalCandidate(IceCandidate),
    /// The remote side's media became available for rendering.
    RemoteTrack { track_id: String },
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::calls::envelope::SdpType;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MediaCall {
        CreateOffer,
        CreateAnswer,
        SetLocal(SdpType),
        SetRemote(SdpType),
        AddCandidate(IceCandidate),
        Close,
        StartLocalMedia,
        AudioEnabled(bool),
        VideoEnabled(bool),
        SwitchCamera,
    }

    /// A scripted media engine that records every call it receives.
    #[derive(Default)]
    pub struct MockMediaEngine {
        calls: Mutex<Vec<MediaCall>>,
        offer_gate: Mutex<Option<oneshot::Receiver<()>>>,
        remote_gate: Mutex<Option<oneshot::Receiver<()>>>,
        fail_create_offer: AtomicBool,
        fail_set_remote: AtomicBool,
        fail_capture: AtomicBool,
    }

    impl MockMediaEngine {
        pub fn new() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self::default())
        }

        /// Make the next `create_offer` wait until the returned sender fires.
        pub fn hold_offer(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.offer_gate.lock().unwrap() = Some(rx);
            tx
        }

        /// Make the next `set_remote_description` wait until the returned sender fires.
        pub fn hold_remote_description(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.remote_gate.lock().unwrap() = Some(rx);
            tx
        }

        pub fn fail_create_offer(&self) {
            self.fail_create_offer.store(true, Ordering::SeqCst);
        }

        pub fn fail_set_remote(&self) {
            self.fail_set_remote.store(true, Ordering::SeqCst);
        }

        pub fn fail_capture(&self) {
            self.fail_capture.store(true, Ordering::SeqCst);
        }

        pub fn calls(&self) -> Vec<MediaCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn applied_candidates(&self) -> Vec<IceCandidate> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    MediaCall::AddCandidate(c) => Some(c),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: MediaCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl MediaEngine for MockMediaEngine {
        async fn create_offer(&self) -> Result<SessionDescription, MediaEngineError> {
            self.record(MediaCall::CreateOffer);
            let gate = self.offer_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.fail_create_offer.load(Ordering::SeqCst) {
                return Err(MediaEngineError::CreateDescription("no codecs".into()));
            }
            Ok(SessionDescription::offer("v=0\r\ns=mock-offer\r\n"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, MediaEngineError> {
            self.record(MediaCall::CreateAnswer);
            Ok(SessionDescription::answer("v=0\r\ns=mock-answer\r\n"))
        }

        async fn set_local_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), MediaEngineError> {
            self.record(MediaCall::SetLocal(desc.sdp_type));
            Ok(())
        }

        async fn set_remote_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), MediaEngineError> {
            self.record(MediaCall::SetRemote(desc.sdp_type));
            let gate = self.remote_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.fail_set_remote.load(Ordering::SeqCst) {
                return Err(MediaEngineError::SetRemoteDescription("bad sdp".into()));
            }
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaEngineError> {
            self.record(MediaCall::AddCandidate(candidate));
            Ok(())
        }

        async fn close(&self) -> Result<(), MediaEngineError> {
            self.record(MediaCall::Close);
            Ok(())
        }

        async fn start_local_media(&self) -> Result<(), MediaEngineError> {
            self.record(MediaCall::StartLocalMedia);
            if self.fail_capture.load(Ordering::SeqCst) {
                return Err(MediaEngineError::CaptureUnavailable("no camera".into()));
            }
            Ok(())
        }

        async fn set_audio_enabled(&self, enabled: bool) -> Result<(), MediaEngineError> {
            self.record(MediaCall::AudioEnabled(enabled));
            Ok(())
        }

        async fn set_video_enabled(&self, enabled: bool) -> Result<(), MediaEngineError> {
            self.record(MediaCall::VideoEnabled(enabled));
            Ok(())
        }

        async fn switch_camera(&self) -> Result<(), MediaEngineError> {
            self.record(MediaCall::SwitchCamera);
            Ok(())
        }
    }
}
