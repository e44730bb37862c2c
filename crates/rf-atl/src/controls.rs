//! Control definitions
//!
//! Triggers, RTPCs, switches and environments each fan out to one or more
//! impls. An impl either carries backend data or names a built-in control
//! the ATL handles itself.

use std::collections::HashMap;

use crate::middleware::{EnvironmentData, RtpcData, SwitchStateData, TriggerData};
use crate::types::internal_controls::*;
use crate::types::{
    ControlId, DataScope, EnvironmentId, FileEntryId, PreloadRequestId, Subsystem, SwitchStateId,
    TriggerImplId, audio_string_to_id,
};

// ═══════════════════════════════════════════════════════════════════════════════
// IMPLS
// ═══════════════════════════════════════════════════════════════════════════════

/// Control kind without built-in variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoInternal {}

/// Receiver of one impl of a control
#[derive(Debug, Clone, PartialEq)]
pub enum ControlImpl<D, I = NoInternal> {
    Middleware(D),
    Internal(I),
}

impl<D, I> ControlImpl<D, I> {
    pub fn subsystem(&self) -> Subsystem {
        match self {
            Self::Middleware(_) => Subsystem::Middleware,
            Self::Internal(_) => Subsystem::AtlInternal,
        }
    }
}

/// Triggers the ATL fires without the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalTrigger {
    /// Completes on the next queue drain
    DoNothing,
}

/// Built-in switch state, interpreted by the ATL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalSwitchState {
    pub switch_id: ControlId,
    pub state_id: SwitchStateId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerImpl {
    pub id: TriggerImplId,
    pub trigger_id: ControlId,
    pub target: ControlImpl<TriggerData, InternalTrigger>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub id: ControlId,
    pub name: String,
    pub scope: DataScope,
    pub impls: Vec<TriggerImpl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rtpc {
    pub id: ControlId,
    pub name: String,
    pub scope: DataScope,
    pub impls: Vec<ControlImpl<RtpcData>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchState {
    pub id: SwitchStateId,
    pub switch_id: ControlId,
    pub name: String,
    pub impls: Vec<ControlImpl<SwitchStateData, InternalSwitchState>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub id: ControlId,
    pub name: String,
    pub scope: DataScope,
    pub states: HashMap<SwitchStateId, SwitchState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    pub scope: DataScope,
    pub impls: Vec<ControlImpl<EnvironmentData>>,
}

/// Named group of files cached together
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadRequest {
    pub id: PreloadRequestId,
    pub name: String,
    pub scope: DataScope,
    pub auto_load: bool,
    pub file_entry_ids: Vec<FileEntryId>,
    pub all_loaded: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOKUPS
// ═══════════════════════════════════════════════════════════════════════════════

/// Every loaded definition, keyed by id
#[derive(Debug, Default)]
pub struct ControlLookups {
    pub triggers: HashMap<ControlId, Trigger>,
    pub rtpcs: HashMap<ControlId, Rtpc>,
    pub switches: HashMap<ControlId, Switch>,
    pub environments: HashMap<EnvironmentId, Environment>,
    pub preloads: HashMap<PreloadRequestId, PreloadRequest>,
}

impl ControlLookups {
    pub fn new() -> Self {
        let mut lookups = Self::default();
        lookups.install_internal_controls();
        lookups
    }

    /// Built-in switches; scope `None` keeps them alive across data clears
    pub fn install_internal_controls(&mut self) {
        self.insert_internal_switch(
            OBSTRUCTION_CALC_SWITCH_NAME,
            &[
                ("ignore", OBSTRUCTION_CALC_IGNORE_STATE_ID),
                ("single_ray", OBSTRUCTION_CALC_SINGLE_RAY_STATE_ID),
                ("multi_ray", OBSTRUCTION_CALC_MULTI_RAY_STATE_ID),
            ],
        );
        self.insert_internal_switch(
            VELOCITY_TRACKING_SWITCH_NAME,
            &[
                ("on", VELOCITY_TRACKING_ON_STATE_ID),
                ("off", VELOCITY_TRACKING_OFF_STATE_ID),
            ],
        );
    }

    fn insert_internal_switch(&mut self, name: &str, states: &[(&str, SwitchStateId)]) {
        let switch_id = audio_string_to_id(name);
        let states = states
            .iter()
            .map(|&(state_name, state_id)| {
                let state = SwitchState {
                    id: state_id,
                    switch_id,
                    name: state_name.to_string(),
                    impls: vec![ControlImpl::Internal(InternalSwitchState {
                        switch_id,
                        state_id,
                    })],
                };
                (state_id, state)
            })
            .collect();
        self.switches.insert(
            switch_id,
            Switch {
                id: switch_id,
                name: name.to_string(),
                scope: DataScope::None,
                states,
            },
        );
    }

    pub fn trigger_id(&self, name: &str) -> Option<ControlId> {
        let id = audio_string_to_id(name);
        self.triggers.contains_key(&id).then_some(id)
    }

    pub fn rtpc_id(&self, name: &str) -> Option<ControlId> {
        let id = audio_string_to_id(name);
        self.rtpcs.contains_key(&id).then_some(id)
    }

    pub fn switch_id(&self, name: &str) -> Option<ControlId> {
        let id = audio_string_to_id(name);
        self.switches.contains_key(&id).then_some(id)
    }

    pub fn switch_state_id(&self, switch_id: ControlId, state_name: &str) -> Option<SwitchStateId> {
        let id = audio_string_to_id(state_name);
        self.switches
            .get(&switch_id)
            .filter(|switch| switch.states.contains_key(&id))
            .map(|_| id)
    }

    pub fn environment_id(&self, name: &str) -> Option<EnvironmentId> {
        let id = audio_string_to_id(name);
        self.environments.contains_key(&id).then_some(id)
    }

    pub fn preload_request_id(&self, name: &str) -> Option<PreloadRequestId> {
        let id = audio_string_to_id(name);
        self.preloads.contains_key(&id).then_some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_switches_installed() {
        let lookups = ControlLookups::new();
        assert_eq!(
            lookups.switch_id(OBSTRUCTION_CALC_SWITCH_NAME),
            Some(OBSTRUCTION_CALC_SWITCH_ID)
        );
        assert_eq!(
            lookups.switch_state_id(VELOCITY_TRACKING_SWITCH_ID, "on"),
            Some(VELOCITY_TRACKING_ON_STATE_ID)
        );
        let state = &lookups.switches[&OBSTRUCTION_CALC_SWITCH_ID].states
            [&OBSTRUCTION_CALC_MULTI_RAY_STATE_ID];
        assert_eq!(state.impls[0].subsystem(), Subsystem::AtlInternal);
    }

    #[test]
    fn test_name_lookup_requires_definition() {
        let mut lookups = ControlLookups::new();
        assert_eq!(lookups.trigger_id("Play_Door"), None);
        let id = audio_string_to_id("play_door");
        lookups.triggers.insert(
            id,
            Trigger {
                id,
                name: "Play_Door".into(),
                scope: DataScope::Global,
                impls: Vec::new(),
            },
        );
        assert_eq!(lookups.trigger_id("Play_Door"), Some(id));
        assert_eq!(lookups.switch_state_id(VELOCITY_TRACKING_SWITCH_ID, "maybe"), None);
    }

    #[test]
    fn test_impl_subsystem() {
        let middleware: ControlImpl<RtpcData> = ControlImpl::Middleware(RtpcData(1));
        assert_eq!(middleware.subsystem(), Subsystem::Middleware);
        let internal: ControlImpl<TriggerData, InternalTrigger> =
            ControlImpl::Internal(InternalTrigger::DoNothing);
        assert_eq!(internal.subsystem(), Subsystem::AtlInternal);
    }
}
