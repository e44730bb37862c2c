//! Identifier types, built-in control ids and small shared enums

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio object / listener identifier (both share one id space)
pub type AudioObjectId = u64;
/// Trigger, RTPC, switch, environment and preload identifiers
pub type ControlId = u32;
pub type SwitchStateId = u32;
pub type EnvironmentId = u32;
pub type PreloadRequestId = u32;
pub type FileEntryId = u32;
pub type EventId = u64;
pub type TriggerImplId = u32;
pub type TriggerInstanceId = u32;
pub type SourceId = u32;
/// Opaque token identifying whoever issued a request
pub type OwnerId = u64;
/// Opaque caller data echoed back in notifications
pub type UserData = u64;

pub const INVALID_AUDIO_OBJECT_ID: AudioObjectId = 0;
pub const GLOBAL_AUDIO_OBJECT_ID: AudioObjectId = 1;
pub const MIN_VALID_AUDIO_OBJECT_ID: AudioObjectId = GLOBAL_AUDIO_OBJECT_ID + 1;

pub const INVALID_CONTROL_ID: ControlId = 0;
pub const INVALID_SWITCH_STATE_ID: SwitchStateId = 0;
pub const INVALID_PRELOAD_REQUEST_ID: PreloadRequestId = 0;
pub const INVALID_FILE_ENTRY_ID: FileEntryId = 0;
pub const INVALID_EVENT_ID: EventId = 0;
pub const INVALID_SOURCE_ID: SourceId = 0;

/// Trigger impl ids below this value are reserved
pub const TRIGGER_IMPL_ID_NUM_RESERVED: TriggerImplId = 100;

// ═══════════════════════════════════════════════════════════════════════════════
// NAME HASHING
// ═══════════════════════════════════════════════════════════════════════════════

/// Hash a control name to its id (CRC-32 of the ASCII-lowercased name).
///
/// `const` so that built-in control ids can be computed at compile time.
pub const fn audio_string_to_id(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut crc: u32 = 0xFFFF_FFFF;
    let mut i = 0;
    while i < bytes.len() {
        crc ^= bytes[i].to_ascii_lowercase() as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        i += 1;
    }
    !crc
}

/// Ids of the controls the ATL interprets itself
pub mod internal_controls {
    use super::{ControlId, PreloadRequestId, SwitchStateId, audio_string_to_id};

    pub const LOSE_FOCUS_TRIGGER_ID: ControlId = audio_string_to_id("lose_focus");
    pub const GET_FOCUS_TRIGGER_ID: ControlId = audio_string_to_id("get_focus");
    pub const MUTE_ALL_TRIGGER_ID: ControlId = audio_string_to_id("mute_all");
    pub const UNMUTE_ALL_TRIGGER_ID: ControlId = audio_string_to_id("unmute_all");
    pub const DO_NOTHING_TRIGGER_ID: ControlId = audio_string_to_id("do_nothing");

    pub const OBJECT_SPEED_RTPC_ID: ControlId = audio_string_to_id("object_speed");

    pub const OBSTRUCTION_CALC_SWITCH_NAME: &str = "ObstructionOcclusionCalculationType";
    pub const OBSTRUCTION_CALC_SWITCH_ID: ControlId =
        audio_string_to_id(OBSTRUCTION_CALC_SWITCH_NAME);
    pub const OBSTRUCTION_CALC_IGNORE_STATE_ID: SwitchStateId = audio_string_to_id("ignore");
    pub const OBSTRUCTION_CALC_SINGLE_RAY_STATE_ID: SwitchStateId =
        audio_string_to_id("single_ray");
    pub const OBSTRUCTION_CALC_MULTI_RAY_STATE_ID: SwitchStateId =
        audio_string_to_id("multi_ray");

    pub const VELOCITY_TRACKING_SWITCH_NAME: &str = "object_velocity_tracking";
    pub const VELOCITY_TRACKING_SWITCH_ID: ControlId =
        audio_string_to_id(VELOCITY_TRACKING_SWITCH_NAME);
    pub const VELOCITY_TRACKING_ON_STATE_ID: SwitchStateId = audio_string_to_id("on");
    pub const VELOCITY_TRACKING_OFF_STATE_ID: SwitchStateId = audio_string_to_id("off");

    pub const GLOBAL_PRELOAD_REQUEST_NAME: &str = "global_atl_preloads";
    pub const GLOBAL_PRELOAD_REQUEST_ID: PreloadRequestId =
        audio_string_to_id(GLOBAL_PRELOAD_REQUEST_NAME);
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifetime partition of loaded control data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataScope {
    #[default]
    None = 0,
    Global = 1,
    LevelSpecific = 2,
    All = 3,
}

impl DataScope {
    /// Whether data living in `scope` is affected by an operation on `self`
    #[inline]
    pub fn covers(&self, scope: DataScope) -> bool {
        *self == DataScope::All || *self == scope
    }
}

/// Which subsystem handles a control impl or owns an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Subsystem {
    #[default]
    Middleware = 0,
    AtlInternal = 1,
}

/// Outcome of processing a request or a backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestStatus {
    #[default]
    None = 0,
    Success,
    PartialSuccess,
    Failure,
    FailureInvalidObjectId,
    FailureInvalidControlId,
    FailureInvalidRequest,
    Pending,
}

impl RequestStatus {
    #[inline]
    pub fn from_bool(success: bool) -> Self {
        if success { Self::Success } else { Self::Failure }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        *self == Self::Success
    }

    /// Backend accepted the call, now or later
    #[inline]
    pub fn is_success_or_pending(&self) -> bool {
        matches!(self, Self::Success | Self::Pending)
    }
}

/// How obstruction/occlusion is computed for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObstructionCalcType {
    #[default]
    None = 0,
    Ignore,
    SingleRay,
    MultiRay,
}

/// Speaker panning mode forwarded to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PanningMode {
    #[default]
    Speakers = 0,
    Headphones,
}

/// Engine-level events the ATL reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    LevelUnload,
    GameplayStart,
    PrecacheStart,
    PostUnload,
    EditorGameModeChanged(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_id_is_crc32() {
        assert_eq!(audio_string_to_id("hello"), 0x3610_A686);
        assert_eq!(audio_string_to_id(""), 0);
    }

    #[test]
    fn test_string_to_id_ignores_case() {
        assert_eq!(
            audio_string_to_id("Play_Footstep"),
            audio_string_to_id("play_footstep")
        );
        assert_ne!(audio_string_to_id("a"), audio_string_to_id("b"));
    }

    #[test]
    fn test_internal_ids_distinct() {
        use internal_controls::*;
        let ids = [
            LOSE_FOCUS_TRIGGER_ID,
            GET_FOCUS_TRIGGER_ID,
            MUTE_ALL_TRIGGER_ID,
            UNMUTE_ALL_TRIGGER_ID,
            DO_NOTHING_TRIGGER_ID,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_scope_covers() {
        assert!(DataScope::All.covers(DataScope::Global));
        assert!(DataScope::All.covers(DataScope::LevelSpecific));
        assert!(DataScope::Global.covers(DataScope::Global));
        assert!(!DataScope::Global.covers(DataScope::LevelSpecific));
    }

    #[test]
    fn test_status_helpers() {
        assert!(RequestStatus::Pending.is_success_or_pending());
        assert!(!RequestStatus::PartialSuccess.is_success_or_pending());
        assert_eq!(RequestStatus::from_bool(false), RequestStatus::Failure);
    }
}
