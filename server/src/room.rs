//! Authoritative room state.
//!
//! `RoomState` is the single source of truth for a session. It is owned by the
//! server event loop and passed by mutable reference through every handler
//! call; nothing else holds it and nothing mutates it outside a validated,
//! authorized handler. The derived scene-object list is rebuilt through
//! [`crate::scene`] after every structural change.

use log::info;
use serde_json::Value;
use shared::{
    Character, Drawing, GridConfig, MapBackground, Player, Pointer, Prop, RoomSnapshot,
    StagingZone, Token,
};
use std::collections::HashMap;

use crate::persistence::SnapshotError;
use crate::scene;
use crate::selection::SelectionTracker;

#[derive(Debug, Default)]
pub struct RoomState {
    pub players: Vec<Player>,
    pub characters: Vec<Character>,
    pub tokens: Vec<Token>,
    pub drawings: Vec<Drawing>,
    pub props: Vec<Prop>,
    pub pointers: Vec<Pointer>,
    pub map_background: Option<MapBackground>,
    pub grid: GridConfig,
    pub staging_zone: Option<StagingZone>,
    pub scene_objects: Vec<shared::SceneObject>,
    pub selections: SelectionTracker,
    /// Per-player stacks of undone drawings, replayable via redo. The undo
    /// side is the drawings list itself, filtered by owner.
    redo_stacks: HashMap<String, Vec<Drawing>>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild_scene(&mut self) {
        scene::rebuild(self);
    }

    // ---- players ----

    pub fn player(&self, uid: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.uid == uid)
    }

    pub fn player_mut(&mut self, uid: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.uid == uid)
    }

    pub fn is_dm(&self, uid: &str) -> bool {
        self.player(uid).map(|p| p.is_dm).unwrap_or(false)
    }

    /// Creates the player on first contact; reconnects reuse the same entry.
    pub fn ensure_player(&mut self, uid: &str, now_ms: u64) -> &mut Player {
        if let Some(index) = self.players.iter().position(|p| p.uid == uid) {
            return &mut self.players[index];
        }

        info!("Player {} joined the room", uid);
        self.players.push(Player::new(uid, uid, now_ms));
        self.players.last_mut().unwrap()
    }

    /// Explicit removal; disconnects never call this.
    pub fn remove_player(&mut self, uid: &str) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.uid != uid);
        if self.players.len() == before {
            return false;
        }

        info!("Player {} removed from the room", uid);
        self.pointers.retain(|p| p.uid != uid);
        self.selections.clear_user(uid);
        self.redo_stacks.remove(uid);
        self.rebuild_scene();
        true
    }

    // ---- tokens ----

    pub fn token(&self, id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == id)
    }

    pub fn token_mut(&mut self, id: &str) -> Option<&mut Token> {
        self.tokens.iter_mut().find(|t| t.id == id)
    }

    pub fn add_token(&mut self, token: Token) {
        info!("Token {} ({}) added", token.id, token.name);
        self.tokens.push(token);
        self.rebuild_scene();
    }

    pub fn remove_token(&mut self, id: &str) -> bool {
        let before = self.tokens.len();
        self.tokens.retain(|t| t.id != id);
        if self.tokens.len() == before {
            return false;
        }
        self.rebuild_scene();
        true
    }

    // ---- props ----

    pub fn prop(&self, id: &str) -> Option<&Prop> {
        self.props.iter().find(|p| p.id == id)
    }

    pub fn prop_mut(&mut self, id: &str) -> Option<&mut Prop> {
        self.props.iter_mut().find(|p| p.id == id)
    }

    pub fn add_prop(&mut self, prop: Prop) {
        self.props.push(prop);
        self.rebuild_scene();
    }

    pub fn remove_prop(&mut self, id: &str) -> bool {
        let before = self.props.len();
        self.props.retain(|p| p.id != id);
        if self.props.len() == before {
            return false;
        }
        self.rebuild_scene();
        true
    }

    // ---- drawings ----

    pub fn drawing(&self, id: &str) -> Option<&Drawing> {
        self.drawings.iter().find(|d| d.id == id)
    }

    /// Adding a stroke invalidates the owner's redo history.
    pub fn add_drawing(&mut self, drawing: Drawing) {
        self.redo_stacks.remove(&drawing.owner);
        self.drawings.push(drawing);
        self.rebuild_scene();
    }

    /// Removes the owner's most recent stroke and parks it for redo.
    pub fn undo_drawing(&mut self, uid: &str) -> bool {
        let index = match self.drawings.iter().rposition(|d| d.owner == uid) {
            Some(index) => index,
            None => return false,
        };

        let drawing = self.drawings.remove(index);
        self.redo_stacks.entry(uid.to_string()).or_default().push(drawing);
        self.rebuild_scene();
        true
    }

    pub fn redo_drawing(&mut self, uid: &str) -> bool {
        let drawing = match self.redo_stacks.get_mut(uid).and_then(|s| s.pop()) {
            Some(drawing) => drawing,
            None => return false,
        };

        self.drawings.push(drawing);
        self.rebuild_scene();
        true
    }

    pub fn clear_drawings(&mut self) {
        self.drawings.clear();
        self.redo_stacks.clear();
        self.rebuild_scene();
    }

    // ---- pointers ----

    pub fn upsert_pointer(&mut self, uid: &str, x: f32, y: f32, now_ms: u64) {
        if let Some(pointer) = self.pointers.iter_mut().find(|p| p.uid == uid) {
            pointer.x = x;
            pointer.y = y;
            pointer.placed_at = now_ms;
        } else {
            self.pointers.push(Pointer {
                uid: uid.to_string(),
                x,
                y,
                placed_at: now_ms,
            });
        }
        self.rebuild_scene();
    }

    /// Drops pointers older than `ttl_ms`; returns whether anything changed.
    pub fn prune_pointers(&mut self, now_ms: u64, ttl_ms: u64) -> bool {
        let before = self.pointers.len();
        self.pointers
            .retain(|p| now_ms.saturating_sub(p.placed_at) < ttl_ms);
        if self.pointers.len() == before {
            return false;
        }
        self.rebuild_scene();
        true
    }

    // ---- world config ----

    pub fn set_map_background(&mut self, background: Option<MapBackground>) {
        self.map_background = background;
        self.rebuild_scene();
    }

    pub fn set_grid(&mut self, grid: GridConfig) {
        self.grid = grid;
    }

    /// Replaces the canonical zone (`None` clears) and rebuilds the scene.
    pub fn set_staging_zone(&mut self, zone: Option<StagingZone>) {
        self.staging_zone = zone;
        self.rebuild_scene();
    }

    /// Spawn point for new tokens: uniform inside the staging zone, or the
    /// origin when no zone is set.
    pub fn spawn_position<R: rand::Rng>(&self, rng: &mut R) -> (f32, f32) {
        match &self.staging_zone {
            Some(zone) => zone.spawn_position(rng),
            None => (0.0, 0.0),
        }
    }

    // ---- snapshots ----

    /// Serializable view of the room. Broadcasts include the ephemeral
    /// pointers; the persistence path strips them.
    pub fn snapshot(&self, include_pointers: bool) -> RoomSnapshot {
        RoomSnapshot {
            players: self.players.clone(),
            characters: self.characters.clone(),
            tokens: self.tokens.clone(),
            drawings: self.drawings.clone(),
            props: self.props.clone(),
            pointers: if include_pointers {
                self.pointers.clone()
            } else {
                Vec::new()
            },
            map_background: self.map_background.clone(),
            grid: self.grid.clone(),
            staging_zone: self.staging_zone,
            scene_objects: self.scene_objects.clone(),
            selections: self.selections.to_map(),
        }
    }

    /// Replaces the world with a loaded session.
    ///
    /// Requires `players` and `tokens` arrays plus either a `drawings` array
    /// or an external `assetRef`; anything else is rejected wholesale before
    /// any state changes.
    pub fn load_session(&mut self, value: &Value) -> Result<(), SnapshotError> {
        if !value.get("players").map(Value::is_array).unwrap_or(false) {
            return Err(SnapshotError::MissingSection("players"));
        }
        if !value.get("tokens").map(Value::is_array).unwrap_or(false) {
            return Err(SnapshotError::MissingSection("tokens"));
        }
        let has_drawings = value.get("drawings").map(Value::is_array).unwrap_or(false);
        let has_asset_ref = value.get("assetRef").map(Value::is_string).unwrap_or(false);
        if !has_drawings && !has_asset_ref {
            return Err(SnapshotError::MissingSection("drawings or assetRef"));
        }

        let snapshot: RoomSnapshot = serde_json::from_value(value.clone())?;
        self.apply_snapshot(snapshot);
        Ok(())
    }

    pub fn apply_snapshot(&mut self, snapshot: RoomSnapshot) {
        self.players = snapshot.players;
        self.characters = snapshot.characters;
        self.tokens = snapshot.tokens;
        self.drawings = snapshot.drawings;
        self.props = snapshot.props;
        // Pointers are ephemeral; a loaded session starts without them.
        self.pointers.clear();
        self.map_background = snapshot.map_background;
        self.grid = snapshot.grid;
        self.staging_zone = snapshot.staging_zone;
        // Saved scene objects seed the sticky overrides for the rebuild.
        self.scene_objects = snapshot.scene_objects;
        self.selections = SelectionTracker::from_map(snapshot.selections);
        self.redo_stacks.clear();
        self.rebuild_scene();
    }
}
