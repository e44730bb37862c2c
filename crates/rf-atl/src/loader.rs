//! Control and preload definition loading
//!
//! A data folder holds one or more `*.json` documents. Each document may
//! carry the sections `triggers`, `rtpcs`, `switches`, `environments` and
//! `preloads`:
//!
//! ```json
//! {
//!   "triggers": [
//!     { "name": "Play_Door", "impls": [ { "tag": "Event", "name": "door_open" } ] }
//!   ],
//!   "switches": [
//!     { "name": "Surface", "states": [ { "name": "wood", "impls": [ ... ] } ] }
//!   ],
//!   "preloads": [
//!     { "name": "Menu", "type": "autoload",
//!       "groups": [ { "platforms": ["linux"], "files": [ { "tag": "File", "name": "menu.bnk" } ] } ] }
//!   ]
//! }
//! ```
//!
//! Impl nodes tagged `ATLTriggerRequest` or `ATLSwitchRequest` resolve to
//! built-in controls; every other node is parsed by the backend.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::controls::{
    ControlImpl, ControlLookups, Environment, InternalSwitchState, InternalTrigger,
    PreloadRequest, Rtpc, Switch, SwitchState, Trigger, TriggerImpl,
};
use crate::error::{AtlError, AtlResult};
use crate::file_cache::FileCacheManager;
use crate::middleware::{AudioMiddleware, ImplNode};
use crate::types::internal_controls::*;
use crate::types::{
    ControlId, DataScope, INVALID_FILE_ENTRY_ID, TRIGGER_IMPL_ID_NUM_RESERVED, TriggerImplId,
    audio_string_to_id,
};

/// Tag of internal trigger impls
pub const INTERNAL_TRIGGER_TAG: &str = "ATLTriggerRequest";
/// Tag of internal switch state impls
pub const INTERNAL_SWITCH_TAG: &str = "ATLSwitchRequest";

const SECTION_TRIGGERS: &str = "triggers";
const SECTION_RTPCS: &str = "rtpcs";
const SECTION_SWITCHES: &str = "switches";
const SECTION_ENVIRONMENTS: &str = "environments";
const SECTION_PRELOADS: &str = "preloads";

const PRELOAD_TYPE_AUTOLOAD: &str = "autoload";

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT SHAPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct ControlDef {
    name: String,
    #[serde(default)]
    impls: Vec<ImplNode>,
}

#[derive(Debug, Deserialize)]
struct SwitchDef {
    name: String,
    #[serde(default)]
    states: Vec<ControlDef>,
}

#[derive(Debug, Deserialize)]
struct PreloadGroupDef {
    /// Empty means "any platform"
    #[serde(default)]
    platforms: Vec<String>,
    #[serde(default)]
    files: Vec<ImplNode>,
}

#[derive(Debug, Deserialize)]
struct PreloadDef {
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    groups: Vec<PreloadGroupDef>,
}

impl PreloadDef {
    fn is_autoload(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case(PRELOAD_TYPE_AUTOLOAD))
    }

    /// Group for `platform`, falling back to a platform-agnostic one
    fn group_for(&self, platform: &str) -> Option<&PreloadGroupDef> {
        self.groups
            .iter()
            .find(|g| g.platforms.iter().any(|p| p.eq_ignore_ascii_case(platform)))
            .or_else(|| self.groups.iter().find(|g| g.platforms.is_empty()))
    }
}

type Document = serde_json::Map<String, serde_json::Value>;

// ═══════════════════════════════════════════════════════════════════════════════
// LOADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Only writer of the control and preload tables
pub struct ControlsLoader {
    platform: String,
    next_trigger_impl_id: TriggerImplId,
}

impl ControlsLoader {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            next_trigger_impl_id: TRIGGER_IMPL_ID_NUM_RESERVED,
        }
    }

    /// Parse every control section found in `folder`
    pub fn parse_controls_data(
        &mut self,
        folder: &Path,
        scope: DataScope,
        lookups: &mut ControlLookups,
        middleware: &mut dyn AudioMiddleware,
    ) -> AtlResult<usize> {
        let documents = read_documents(folder)?;
        let count = documents.len();

        for (path, document) in documents {
            for (section, value) in document {
                let parsed = match section.as_str() {
                    SECTION_TRIGGERS => serde_json::from_value(value)
                        .map(|defs| self.parse_triggers(defs, scope, lookups, middleware)),
                    SECTION_RTPCS => serde_json::from_value(value)
                        .map(|defs| parse_rtpcs(defs, scope, lookups, middleware)),
                    SECTION_SWITCHES => serde_json::from_value(value)
                        .map(|defs| parse_switches(defs, scope, lookups, middleware)),
                    SECTION_ENVIRONMENTS => serde_json::from_value(value)
                        .map(|defs| parse_environments(defs, scope, lookups, middleware)),
                    SECTION_PRELOADS => Ok(()),
                    other => {
                        log::error!("Unknown section '{}' in {}", other, path.display());
                        Ok(())
                    }
                };
                if let Err(e) = parsed {
                    log::error!("Malformed '{}' section in {}: {}", section, path.display(), e);
                }
            }
        }

        log::debug!(
            "Parsed controls from {} file(s) in {} ({:?})",
            count,
            folder.display(),
            scope
        );
        Ok(count)
    }

    /// Parse the preload sections found in `folder`, creating file cache entries
    pub fn parse_preloads_data(
        &mut self,
        folder: &Path,
        scope: DataScope,
        lookups: &mut ControlLookups,
        file_cache: &mut FileCacheManager,
        middleware: &mut dyn AudioMiddleware,
    ) -> AtlResult<usize> {
        let documents = read_documents(folder)?;
        let count = documents.len();
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for (path, mut document) in documents {
            let Some(value) = document.remove(SECTION_PRELOADS) else {
                continue;
            };
            match serde_json::from_value::<Vec<PreloadDef>>(value) {
                Ok(defs) => {
                    for def in defs {
                        self.parse_preload(def, scope, &folder_name, lookups, file_cache, middleware);
                    }
                }
                Err(e) => log::error!("Malformed preloads section in {}: {}", path.display(), e),
            }
        }
        Ok(count)
    }

    /// Drop every control definition of `scope`, deleting its backend data
    pub fn clear_controls_data(
        &mut self,
        scope: DataScope,
        lookups: &mut ControlLookups,
        middleware: &mut dyn AudioMiddleware,
    ) {
        for (_, trigger) in drain_scope(&mut lookups.triggers, scope, |t| t.scope) {
            for trigger_impl in trigger.impls {
                if let ControlImpl::Middleware(data) = trigger_impl.target {
                    middleware.delete_trigger_impl_data(data);
                }
            }
        }
        for (_, rtpc) in drain_scope(&mut lookups.rtpcs, scope, |r| r.scope) {
            for rtpc_impl in rtpc.impls {
                if let ControlImpl::Middleware(data) = rtpc_impl {
                    middleware.delete_rtpc_impl_data(data);
                }
            }
        }
        for (_, switch) in drain_scope(&mut lookups.switches, scope, |s| s.scope) {
            for state in switch.states.into_values() {
                for state_impl in state.impls {
                    if let ControlImpl::Middleware(data) = state_impl {
                        middleware.delete_switch_state_impl_data(data);
                    }
                }
            }
        }
        for (_, environment) in drain_scope(&mut lookups.environments, scope, |e| e.scope) {
            for environment_impl in environment.impls {
                if let ControlImpl::Middleware(data) = environment_impl {
                    middleware.delete_environment_impl_data(data);
                }
            }
        }
    }

    /// Drop every preload request of `scope` together with its file entries
    pub fn clear_preloads_data(
        &mut self,
        scope: DataScope,
        lookups: &mut ControlLookups,
        file_cache: &mut FileCacheManager,
        middleware: &mut dyn AudioMiddleware,
    ) {
        for (_, request) in drain_scope(&mut lookups.preloads, scope, |p| p.scope) {
            for file_id in request.file_entry_ids {
                file_cache.try_remove_file_cache_entry(file_id, request.scope, middleware);
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Sections
    // ───────────────────────────────────────────────────────────────────────────

    fn parse_triggers(
        &mut self,
        defs: Vec<ControlDef>,
        scope: DataScope,
        lookups: &mut ControlLookups,
        middleware: &mut dyn AudioMiddleware,
    ) {
        for def in defs {
            let id = audio_string_to_id(&def.name);
            if lookups.triggers.contains_key(&id) {
                log::error!("Trigger '{}' already defined (id {})", def.name, id);
                continue;
            }

            let mut impls = Vec::with_capacity(def.impls.len());
            for node in &def.impls {
                let target = if node.tag == INTERNAL_TRIGGER_TAG {
                    match internal_trigger(node) {
                        Some(internal) => ControlImpl::Internal(internal),
                        None => {
                            log::warn!("Trigger '{}': unknown internal trigger '{}'", def.name, node.name);
                            continue;
                        }
                    }
                } else {
                    match middleware.new_trigger_impl_data(node) {
                        Some(data) => ControlImpl::Middleware(data),
                        None => {
                            log::warn!("Trigger '{}': backend rejected impl '{}'", def.name, node.name);
                            continue;
                        }
                    }
                };
                impls.push(TriggerImpl {
                    id: self.next_trigger_impl_id(),
                    trigger_id: id,
                    target,
                });
            }

            lookups.triggers.insert(
                id,
                Trigger {
                    id,
                    name: def.name,
                    scope,
                    impls,
                },
            );
        }
    }

    fn parse_preload(
        &mut self,
        def: PreloadDef,
        scope: DataScope,
        folder_name: &str,
        lookups: &mut ControlLookups,
        file_cache: &mut FileCacheManager,
        middleware: &mut dyn AudioMiddleware,
    ) {
        let auto_load = def.is_autoload();
        let name = match (auto_load, scope) {
            (true, DataScope::Global) => GLOBAL_PRELOAD_REQUEST_NAME.to_string(),
            (true, DataScope::LevelSpecific) if !folder_name.is_empty() => folder_name.to_string(),
            _ => def.name.clone(),
        };
        let id = audio_string_to_id(&name);

        let Some(group) = def.group_for(&self.platform) else {
            log::warn!("Preload '{}' has no files for platform '{}'", name, self.platform);
            return;
        };

        let file_entry_ids: Vec<_> = group
            .files
            .iter()
            .map(|node| file_cache.try_add_file_cache_entry(node, scope, auto_load, middleware))
            .filter(|&file_id| file_id != INVALID_FILE_ENTRY_ID)
            .collect();

        match lookups.preloads.get_mut(&id) {
            Some(existing) => {
                log::debug!("Preload '{}' extended by {} file(s)", name, file_entry_ids.len());
                existing.file_entry_ids.extend(file_entry_ids);
                existing.all_loaded = false;
            }
            None => {
                log::debug!("Preload '{}' defined with {} file(s)", name, file_entry_ids.len());
                lookups.preloads.insert(
                    id,
                    PreloadRequest {
                        id,
                        name,
                        scope,
                        auto_load,
                        file_entry_ids,
                        all_loaded: false,
                    },
                );
            }
        }
    }

    fn next_trigger_impl_id(&mut self) -> TriggerImplId {
        let id = self.next_trigger_impl_id;
        self.next_trigger_impl_id = self.next_trigger_impl_id.wrapping_add(1);
        if self.next_trigger_impl_id < TRIGGER_IMPL_ID_NUM_RESERVED {
            log::error!("Trigger impl id counter wrapped around");
            self.next_trigger_impl_id = TRIGGER_IMPL_ID_NUM_RESERVED;
        }
        id
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_rtpcs(
    defs: Vec<ControlDef>,
    scope: DataScope,
    lookups: &mut ControlLookups,
    middleware: &mut dyn AudioMiddleware,
) {
    for def in defs {
        let id = audio_string_to_id(&def.name);
        if lookups.rtpcs.contains_key(&id) {
            log::error!("RTPC '{}' already defined (id {})", def.name, id);
            continue;
        }
        let impls = def
            .impls
            .iter()
            .filter_map(|node| {
                let data = middleware.new_rtpc_impl_data(node);
                if data.is_none() {
                    log::warn!("RTPC '{}': backend rejected impl '{}'", def.name, node.name);
                }
                data.map(ControlImpl::Middleware)
            })
            .collect();
        lookups.rtpcs.insert(
            id,
            Rtpc {
                id,
                name: def.name,
                scope,
                impls,
            },
        );
    }
}

fn parse_switches(
    defs: Vec<SwitchDef>,
    scope: DataScope,
    lookups: &mut ControlLookups,
    middleware: &mut dyn AudioMiddleware,
) {
    for def in defs {
        let switch_id = audio_string_to_id(&def.name);
        if lookups.switches.contains_key(&switch_id) {
            log::error!("Switch '{}' already defined (id {})", def.name, switch_id);
            continue;
        }

        let mut states = HashMap::with_capacity(def.states.len());
        for state_def in def.states {
            let state_id = audio_string_to_id(&state_def.name);
            if states.contains_key(&state_id) {
                log::error!("Switch '{}': state '{}' defined twice", def.name, state_def.name);
                continue;
            }
            let impls = state_def
                .impls
                .iter()
                .filter_map(|node| {
                    let state_impl = if node.tag == INTERNAL_SWITCH_TAG {
                        internal_switch_state(node).map(ControlImpl::Internal)
                    } else {
                        middleware
                            .new_switch_state_impl_data(node)
                            .map(ControlImpl::Middleware)
                    };
                    if state_impl.is_none() {
                        log::warn!("Switch state '{}': impl '{}' rejected", state_def.name, node.name);
                    }
                    state_impl
                })
                .collect();
            states.insert(
                state_id,
                SwitchState {
                    id: state_id,
                    switch_id,
                    name: state_def.name,
                    impls,
                },
            );
        }

        lookups.switches.insert(
            switch_id,
            Switch {
                id: switch_id,
                name: def.name,
                scope,
                states,
            },
        );
    }
}

fn parse_environments(
    defs: Vec<ControlDef>,
    scope: DataScope,
    lookups: &mut ControlLookups,
    middleware: &mut dyn AudioMiddleware,
) {
    for def in defs {
        let id = audio_string_to_id(&def.name);
        if lookups.environments.contains_key(&id) {
            log::error!("Environment '{}' already defined (id {})", def.name, id);
            continue;
        }
        let impls: Vec<_> = def
            .impls
            .iter()
            .filter_map(|node| middleware.new_environment_impl_data(node))
            .map(ControlImpl::Middleware)
            .collect();
        if impls.is_empty() {
            log::warn!("Environment '{}' has no usable impl, dropped", def.name);
            continue;
        }
        lookups.environments.insert(
            id,
            Environment {
                id,
                name: def.name,
                scope,
                impls,
            },
        );
    }
}

fn internal_trigger(node: &ImplNode) -> Option<InternalTrigger> {
    (audio_string_to_id(&node.name) == DO_NOTHING_TRIGGER_ID).then_some(InternalTrigger::DoNothing)
}

fn internal_switch_state(node: &ImplNode) -> Option<InternalSwitchState> {
    let switch = node.properties.get("switch")?.as_str()?;
    let state = node.properties.get("state")?.as_str()?;
    let switch_id: ControlId = audio_string_to_id(switch);
    if switch_id != OBSTRUCTION_CALC_SWITCH_ID && switch_id != VELOCITY_TRACKING_SWITCH_ID {
        return None;
    }
    Some(InternalSwitchState {
        switch_id,
        state_id: audio_string_to_id(state),
    })
}

/// Remove and return every entry whose scope is covered by `scope`
fn drain_scope<K, V>(
    map: &mut HashMap<K, V>,
    scope: DataScope,
    scope_of: impl Fn(&V) -> DataScope,
) -> Vec<(K, V)>
where
    K: std::hash::Hash + Eq + Copy,
{
    let keys: Vec<K> = map
        .iter()
        .filter(|(_, v)| scope.covers(scope_of(v)))
        .map(|(k, _)| *k)
        .collect();
    keys.into_iter()
        .filter_map(|k| map.remove(&k).map(|v| (k, v)))
        .collect()
}

/// Every `*.json` document in `folder`, in file name order
fn read_documents(folder: &Path) -> AtlResult<Vec<(PathBuf, Document)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(document)) => documents.push((path, document)),
            Ok(_) => log::error!("{}: top level must be an object", path.display()),
            Err(e) => log::error!("{}: {}", path.display(), AtlError::from(e)),
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_cache::FileEntryFlags;
    use crate::test_support::MockMiddleware;

    const CONTROLS: &str = r#"{
        "triggers": [
            { "name": "Play_Door", "impls": [
                { "tag": "Event", "name": "door_a" },
                { "tag": "Invalid", "name": "broken" },
                { "tag": "ATLTriggerRequest", "name": "do_nothing" }
            ] },
            { "name": "Play_Door", "impls": [] }
        ],
        "rtpcs": [ { "name": "Speed", "impls": [ { "tag": "Param", "name": "speed" } ] } ],
        "switches": [ { "name": "Surface", "states": [
            { "name": "wood", "impls": [ { "tag": "State", "name": "wood" } ] },
            { "name": "stone", "impls": [ { "tag": "ATLSwitchRequest", "name": "x",
              "properties": { "switch": "object_velocity_tracking", "state": "on" } } ] }
        ] } ],
        "environments": [
            { "name": "Cave", "impls": [ { "tag": "Aux", "name": "cave" } ] },
            { "name": "Empty", "impls": [ { "tag": "Invalid", "name": "nope" } ] }
        ],
        "bogus": []
    }"#;

    fn write(dir: &Path, name: &str, text: &str) {
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_parse_controls() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "controls.json", CONTROLS);
        write(dir.path(), "notes.txt", "ignored");

        let mut mw = MockMiddleware::new();
        let mut lookups = ControlLookups::new();
        let mut loader = ControlsLoader::new("linux");
        let parsed = loader
            .parse_controls_data(dir.path(), DataScope::Global, &mut lookups, &mut mw)
            .unwrap();
        assert_eq!(parsed, 1);

        let trigger = &lookups.triggers[&audio_string_to_id("play_door")];
        assert_eq!(trigger.impls.len(), 2);
        assert_eq!(trigger.impls[0].id, TRIGGER_IMPL_ID_NUM_RESERVED);
        assert_eq!(trigger.impls[1].target, ControlImpl::Internal(InternalTrigger::DoNothing));

        assert_eq!(lookups.rtpc_id("speed"), Some(audio_string_to_id("speed")));
        let surface = lookups.switch_id("Surface").unwrap();
        let stone = lookups.switch_state_id(surface, "stone").unwrap();
        assert_eq!(
            lookups.switches[&surface].states[&stone].impls[0],
            ControlImpl::Internal(InternalSwitchState {
                switch_id: VELOCITY_TRACKING_SWITCH_ID,
                state_id: VELOCITY_TRACKING_ON_STATE_ID,
            })
        );
        assert!(lookups.environment_id("Cave").is_some());
        assert!(lookups.environment_id("Empty").is_none());
    }

    #[test]
    fn test_missing_folder_is_error() {
        let mut mw = MockMiddleware::new();
        let mut lookups = ControlLookups::new();
        let mut loader = ControlsLoader::new("linux");
        let result = loader.parse_controls_data(
            Path::new("/definitely/not/here"),
            DataScope::Global,
            &mut lookups,
            &mut mw,
        );
        assert!(matches!(result, Err(AtlError::Io(_))));
    }

    #[test]
    fn test_clear_controls_by_scope_keeps_builtins() {
        let global = tempfile::tempdir().unwrap();
        write(global.path(), "a.json", CONTROLS);
        let level = tempfile::tempdir().unwrap();
        write(
            level.path(),
            "b.json",
            r#"{ "triggers": [ { "name": "Level_Amb", "impls": [ { "tag": "Event", "name": "amb" } ] } ] }"#,
        );

        let mut mw = MockMiddleware::new();
        let mut lookups = ControlLookups::new();
        let mut loader = ControlsLoader::new("linux");
        loader
            .parse_controls_data(global.path(), DataScope::Global, &mut lookups, &mut mw)
            .unwrap();
        loader
            .parse_controls_data(level.path(), DataScope::LevelSpecific, &mut lookups, &mut mw)
            .unwrap();

        loader.clear_controls_data(DataScope::LevelSpecific, &mut lookups, &mut mw);
        assert!(lookups.trigger_id("Level_Amb").is_none());
        assert!(lookups.trigger_id("Play_Door").is_some());
        assert_eq!(mw.count("delete_trigger_impl_data"), 1);

        loader.clear_controls_data(DataScope::All, &mut lookups, &mut mw);
        assert!(lookups.triggers.is_empty());
        assert!(lookups.rtpcs.is_empty());
        assert!(lookups.switch_id(OBSTRUCTION_CALC_SWITCH_NAME).is_some());
        assert!(lookups.switch_id(VELOCITY_TRACKING_SWITCH_NAME).is_some());
        assert!(lookups.switch_id("Surface").is_none());
        assert_eq!(mw.count("delete_switch_state_impl_data"), 1);
    }

    #[test]
    fn test_parse_and_clear_preloads() {
        let data = tempfile::tempdir().unwrap();
        std::fs::write(data.path().join("menu.bnk"), [0u8; 64]).unwrap();
        std::fs::write(data.path().join("init.bnk"), [0u8; 32]).unwrap();

        let controls = tempfile::tempdir().unwrap();
        write(
            controls.path(),
            "preloads.json",
            r#"{ "preloads": [
                { "name": "Startup", "type": "autoload", "groups": [
                    { "platforms": ["console"], "files": [ { "tag": "File", "name": "other.bnk" } ] },
                    { "platforms": [], "files": [ { "tag": "File", "name": "init.bnk" } ] }
                ] },
                { "name": "Menu", "groups": [
                    { "platforms": ["linux"], "files": [ { "tag": "File", "name": "menu.bnk" } ] }
                ] }
            ] }"#,
        );

        let mut mw = MockMiddleware::with_file_root(data.path());
        let mut lookups = ControlLookups::new();
        let mut cache = FileCacheManager::new(1024);
        let mut loader = ControlsLoader::new("linux");
        loader
            .parse_preloads_data(controls.path(), DataScope::Global, &mut lookups, &mut cache, &mut mw)
            .unwrap();

        let global = &lookups.preloads[&GLOBAL_PRELOAD_REQUEST_ID];
        assert!(global.auto_load);
        assert_eq!(global.file_entry_ids.len(), 1);
        let menu = &lookups.preloads[&lookups.preload_request_id("Menu").unwrap()];
        assert!(!menu.auto_load);
        let menu_entry = cache.entry(menu.file_entry_ids[0]).unwrap();
        assert!(menu_entry.flags.contains(FileEntryFlags::USE_COUNTED));
        assert_eq!(cache.num_entries(), 2);

        loader.clear_preloads_data(DataScope::All, &mut lookups, &mut cache, &mut mw);
        assert!(lookups.preloads.is_empty());
        assert_eq!(cache.num_entries(), 0);
    }

    #[test]
    fn test_level_autoload_named_after_folder() {
        let root = tempfile::tempdir().unwrap();
        let level = root.path().join("harbor");
        std::fs::create_dir(&level).unwrap();
        write(
            &level,
            "p.json",
            r#"{ "preloads": [ { "name": "Whatever", "type": "AutoLoad", "groups": [ { "files": [] } ] } ] }"#,
        );

        let mut mw = MockMiddleware::with_file_root(root.path());
        let mut lookups = ControlLookups::new();
        let mut cache = FileCacheManager::new(1024);
        let mut loader = ControlsLoader::new("linux");
        loader
            .parse_preloads_data(&level, DataScope::LevelSpecific, &mut lookups, &mut cache, &mut mw)
            .unwrap();
        assert!(lookups.preload_request_id("harbor").is_some());
        assert!(lookups.preload_request_id("Whatever").is_none());
    }
}
