use crate::model::ContainerState;
use serde::{Deserialize, Serialize};

/// Value of the state marker while a container has never been started.
pub const CREATED_MARKER: &str = "created";

/// Status codes reported by the engine for a container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Started,
    Stopped,
    Running,
    Cancelling,
    Pending,
    Starting,
    Stopping,
    Aborting,
    Freezing,
    Frozen,
    Thawed,
    Error,
    /// A code this crate does not know about.
    Unrecognized(u16),
}

impl EngineStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            101 => EngineStatus::Started,
            102 => EngineStatus::Stopped,
            103 => EngineStatus::Running,
            104 => EngineStatus::Cancelling,
            105 => EngineStatus::Pending,
            106 => EngineStatus::Starting,
            107 => EngineStatus::Stopping,
            108 => EngineStatus::Aborting,
            109 => EngineStatus::Freezing,
            110 => EngineStatus::Frozen,
            111 => EngineStatus::Thawed,
            112 => EngineStatus::Error,
            other => EngineStatus::Unrecognized(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            EngineStatus::Started => 101,
            EngineStatus::Stopped => 102,
            EngineStatus::Running => 103,
            EngineStatus::Cancelling => 104,
            EngineStatus::Pending => 105,
            EngineStatus::Starting => 106,
            EngineStatus::Stopping => 107,
            EngineStatus::Aborting => 108,
            EngineStatus::Freezing => 109,
            EngineStatus::Frozen => 110,
            EngineStatus::Thawed => 111,
            EngineStatus::Error => 112,
            EngineStatus::Unrecognized(code) => code,
        }
    }

    fn is_halted(self) -> bool {
        matches!(
            self,
            EngineStatus::Stopped | EngineStatus::Aborting | EngineStatus::Stopping
        )
    }
}

/// Map an engine status and the optional state marker to a logical state.
///
/// The engine has no "created but never started" status, so a halted
/// container carrying the `created` marker is reported as Created. Removing
/// the marker is the start operation's job, never this function's.
pub fn derive_state(status: EngineStatus, marker: Option<&str>) -> ContainerState {
    match status {
        EngineStatus::Running => ContainerState::Running,
        s if s.is_halted() && marker == Some(CREATED_MARKER) => ContainerState::Created,
        s if s.is_halted() => ContainerState::Exited,
        _ => ContainerState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KNOWN: [EngineStatus; 12] = [
        EngineStatus::Started,
        EngineStatus::Stopped,
        EngineStatus::Running,
        EngineStatus::Cancelling,
        EngineStatus::Pending,
        EngineStatus::Starting,
        EngineStatus::Stopping,
        EngineStatus::Aborting,
        EngineStatus::Freezing,
        EngineStatus::Frozen,
        EngineStatus::Thawed,
        EngineStatus::Error,
    ];

    #[test]
    fn documented_cases() {
        assert_eq!(
            derive_state(EngineStatus::Running, None),
            ContainerState::Running
        );
        assert_eq!(
            derive_state(EngineStatus::Stopped, Some("created")),
            ContainerState::Created
        );
        assert_eq!(
            derive_state(EngineStatus::Stopped, None),
            ContainerState::Exited
        );
        assert_eq!(
            derive_state(EngineStatus::Aborting, Some("created")),
            ContainerState::Created
        );
        assert_eq!(
            derive_state(EngineStatus::Unrecognized(999), Some("created")),
            ContainerState::Unknown
        );
    }

    #[test]
    fn running_wins_over_marker() {
        assert_eq!(
            derive_state(EngineStatus::Running, Some("created")),
            ContainerState::Running
        );
    }

    #[test]
    fn other_marker_values_mean_exited() {
        assert_eq!(
            derive_state(EngineStatus::Stopping, Some("running")),
            ContainerState::Exited
        );
        assert_eq!(
            derive_state(EngineStatus::Stopped, Some("")),
            ContainerState::Exited
        );
    }

    #[test]
    fn only_halted_with_created_marker_yields_created() {
        let statuses = ALL_KNOWN
            .iter()
            .copied()
            .chain([EngineStatus::Unrecognized(0), EngineStatus::Unrecognized(500)]);
        for status in statuses {
            for marker in [None, Some("created"), Some("exited"), Some("CREATED")] {
                let state = derive_state(status, marker);
                let expect_created = marker == Some("created")
                    && matches!(
                        status,
                        EngineStatus::Stopped | EngineStatus::Aborting | EngineStatus::Stopping
                    );
                assert_eq!(
                    state == ContainerState::Created,
                    expect_created,
                    "{status:?} {marker:?}"
                );
            }
        }
    }

    #[test]
    fn codes_map_both_ways() {
        for status in ALL_KNOWN {
            assert_eq!(EngineStatus::from_code(status.code()), status);
        }
        assert_eq!(
            EngineStatus::from_code(42),
            EngineStatus::Unrecognized(42)
        );
    }
}
