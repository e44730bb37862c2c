//! In-flight backend operations

use serde::{Deserialize, Serialize};

use crate::middleware::EventData;
use crate::types::{
    AudioObjectId, ControlId, DataScope, EventId, INVALID_AUDIO_OBJECT_ID, INVALID_CONTROL_ID,
    Subsystem, TriggerImplId, TriggerInstanceId,
};

/// No trigger instance (prepare/unprepare events)
pub const INVALID_TRIGGER_INSTANCE_ID: TriggerInstanceId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventState {
    #[default]
    None = 0,
    Playing,
    /// Was `Loading`, the backend has since reported it started
    PlayingDelayed,
    Loading,
    Unloading,
}

/// One backend operation started on behalf of a trigger impl
#[derive(Debug, Clone, PartialEq)]
pub struct AtlEvent {
    pub id: EventId,
    pub object_id: AudioObjectId,
    pub trigger_id: ControlId,
    pub trigger_impl_id: TriggerImplId,
    pub trigger_instance_id: TriggerInstanceId,
    pub state: EventState,
    pub sender: Subsystem,
    pub data: Option<EventData>,
    pub scope: DataScope,
}

impl AtlEvent {
    pub fn new(id: EventId, sender: Subsystem, data: Option<EventData>) -> Self {
        Self {
            id,
            object_id: INVALID_AUDIO_OBJECT_ID,
            trigger_id: INVALID_CONTROL_ID,
            trigger_impl_id: 0,
            trigger_instance_id: INVALID_TRIGGER_INSTANCE_ID,
            state: EventState::None,
            sender,
            data,
            scope: DataScope::None,
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        matches!(self.state, EventState::Playing | EventState::PlayingDelayed)
    }

    /// Forget the last operation, keeping id and backend data for reuse
    pub fn clear(&mut self) {
        *self = Self::new(self.id, self.sender, self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playing_states() {
        let mut event = AtlEvent::new(3, Subsystem::Middleware, Some(EventData(9)));
        assert!(!event.is_playing());
        event.state = EventState::PlayingDelayed;
        assert!(event.is_playing());
        event.state = EventState::Loading;
        assert!(!event.is_playing());
    }

    #[test]
    fn test_clear_keeps_identity() {
        let mut event = AtlEvent::new(3, Subsystem::Middleware, Some(EventData(9)));
        event.object_id = 12;
        event.trigger_id = 44;
        event.state = EventState::Playing;
        event.clear();
        assert_eq!(event.id, 3);
        assert_eq!(event.data, Some(EventData(9)));
        assert_eq!(event.object_id, INVALID_AUDIO_OBJECT_ID);
        assert_eq!(event.state, EventState::None);
    }
}
