//! Control-plane record types exchanged as strict JSON.
//!
//! Every struct here derives `Deserialize` with `#[serde(deny_unknown_fields)]`:
//! the wire contract in the external interfaces section requires unknown
//! fields to be rejected and required fields enforced, so that is the
//! default for every payload that crosses a process boundary rather
//! than something bolted on as an afterthought.

use serde::{Deserialize, Serialize};

/// Broadcast topic strings. Defined once so the coordinator and every
/// worker match on the same literals.
pub const TOPIC_CONFIG: &str = "CONFIG";
pub const TOPIC_START: &str = "START";
pub const TOPIC_FINISH: &str = "FINISH";
pub const TOPIC_STOP_END_LOOP: &str = "STOP_END_LOOP";

/// Data-plane end-of-stream marker. Exactly 3 bytes; receivers must
/// not infer this from payload length since a test's `size` can be
/// zero.
pub const END_MARKER: &[u8] = b"END";

/// ASCII acknowledgement reply to an `UpdateRecord`.
pub const ACK: &[u8] = b"ACK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// The worker state machine. [`WorkerState::can_advance_to`] documents
/// and tests the allowed edges; the coordinator itself applies every
/// update unconditionally and only ever asserts the registry-wide
/// milestone aggregate before advancing a test phase, per the
/// component design's "rejects no update" rule — a worker's own
/// control flow is what actually keeps it on this DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    ConnectingToCoordinator,
    ConnectedToSync,
    ReceivedConfig,
    ReadyToTest,
    RunningTest,
    FinishedTest,
}

impl WorkerState {
    pub fn can_advance_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (ConnectingToCoordinator, ConnectedToSync)
                | (ConnectedToSync, ReceivedConfig)
                | (ReceivedConfig, ReadyToTest)
                | (ReadyToTest, RunningTest)
                | (RunningTest, FinishedTest)
                | (FinishedTest, ReceivedConfig)
        )
    }
}

/// Optional receiver-side sink for received payloads. A small tagged
/// variant plus the constructor in [`crate::callbacks`] is the whole
/// polymorphism story here — there is no trait object, since the two
/// variants share no behavior beyond the two methods the constructor
/// already knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveCallback {
    None,
    WriteNpy,
}

impl Default for ReceiveCallback {
    fn default() -> Self {
        ReceiveCallback::None
    }
}

/// One cell of the test matrix, broadcast verbatim to every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    pub test_number: usize,
    pub count: usize,
    pub size: usize,
    pub zero_copy: bool,
    pub pub_mode: bool,
    pub send_hwm: usize,
    pub recv_hwm: usize,
    #[serde(default)]
    pub receiver_callback: ReceiveCallback,
}

/// `GroupSetup` field names are the one wire schema the spec pins
/// down exactly (`group_id`, `data_port`, `receiver_ports`, `index`);
/// every field below matches that literally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSetup {
    pub group_id: u64,
    pub data_port: u16,
    pub receiver_ports: Vec<u16>,
    pub index: usize,
}

/// First message a worker ever sends: the registration record that
/// the coordinator's assembly phase consumes to form groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrationRecord {
    pub worker_id: String,
    pub role: Role,
}

/// Per-worker test outcome, surfaced to the coordinator exactly once
/// per test inside the `FINISHED_TEST` update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestResult {
    pub worker_id: String,
    pub role: Role,
    pub config: TestConfig,
    pub messages_sent: Option<usize>,
    pub messages_received: Option<usize>,
    pub throughput_mbps: f64,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
}

/// Every message after registration: a worker reporting its new
/// state, optionally carrying the test result when the new state is
/// `FinishedTest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRecord {
    pub worker_id: String,
    pub state: WorkerState,
    pub test_number: usize,
    #[serde(default)]
    pub result: Option<TestResult>,
}

/// Strict parse: rejects unknown fields (via `deny_unknown_fields`)
/// and missing required fields (via serde's normal missing-field
/// error), matching the parsing-failure error kind in the design.
pub fn parse_strict<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> anyhow::Result<T> {
    serde_json::from_slice(payload).map_err(|e| anyhow::anyhow!("malformed control payload: {e}"))
}

pub fn to_json<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_matches_documented_edges() {
        use WorkerState::*;
        assert!(ConnectingToCoordinator.can_advance_to(ConnectedToSync));
        assert!(ConnectedToSync.can_advance_to(ReceivedConfig));
        assert!(ReceivedConfig.can_advance_to(ReadyToTest));
        assert!(ReadyToTest.can_advance_to(RunningTest));
        assert!(RunningTest.can_advance_to(FinishedTest));
        assert!(FinishedTest.can_advance_to(ReceivedConfig));

        assert!(!ConnectingToCoordinator.can_advance_to(RunningTest));
        assert!(!FinishedTest.can_advance_to(FinishedTest));
    }

    #[test]
    fn test_config_round_trips_field_by_field() {
        let config = TestConfig {
            test_number: 3,
            count: 100,
            size: 64,
            zero_copy: true,
            pub_mode: false,
            send_hwm: 1000,
            recv_hwm: 1000,
            receiver_callback: ReceiveCallback::None,
        };
        let encoded = to_json(&config).unwrap();
        let decoded: TestConfig = parse_strict(&encoded).unwrap();
        assert_eq!(config, decoded);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let payload = br#"{"group_id":1,"data_port":6000,"receiver_ports":[6000],"index":0,"extra":true}"#;
        let result: anyhow::Result<GroupSetup> = parse_strict(payload);
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let payload = br#"{"group_id":1,"data_port":6000}"#;
        let result: anyhow::Result<GroupSetup> = parse_strict(payload);
        assert!(result.is_err());
    }
}
