use std::time::Duration;

/// How remote connectivity candidates are handed to the media engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CandidatePolicy {
    /// Apply every remote candidate immediately. Requires a media engine that
    /// queues candidates internally until a remote description is set.
    #[default]
    PassThrough,
    /// Hold remote candidates until a remote description has been applied,
    /// then flush them in arrival order.
    BufferUntilRemoteDescription,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Display name registered with the relay.
    pub identity: String,
    /// How long to wait for the relay's `call_response` to a `start_call`.
    pub call_response_timeout: Duration,
    /// Capacity of the outbound relay queue and the inbound event queue.
    pub send_queue_capacity: usize,
    pub candidate_policy: CandidatePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            call_response_timeout: Duration::from_secs(30),
            send_queue_capacity: 100,
            candidate_policy: CandidatePolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    pub fn with_call_response_timeout(mut self, timeout: Duration) -> Self {
        self.call_response_timeout = timeout;
        self
    }

    pub fn with_candidate_policy(mut self, policy: CandidatePolicy) -> Self {
        self.candidate_policy = policy;
        self
    }
}
