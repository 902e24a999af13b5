//! Soundboard layout: a list of tiles, each pointing at a clip on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

const fn default_volume() -> f32 {
    1.0
}

/// A single tile on the soundboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Text displayed on the tile.
    pub name: String,
    /// Clip played when the tile is triggered.
    pub file: PathBuf,
    /// Per-clip volume, combined with the master volume during playback.
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Tile {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            file: file.into(),
            volume: default_volume(),
        }
    }

    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }
}

/// A set of tiles, serialized as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Soundboard {
    #[serde(default)]
    pub tiles: Vec<Tile>,
}

impl Soundboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a soundboard from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save the soundboard as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn add(&mut self, tile: Tile) -> Uuid {
        let id = tile.id;
        self.tiles.push(tile);
        id
    }

    /// Remove a tile by id. Returns the removed tile, if any.
    pub fn remove(&mut self, id: Uuid) -> Option<Tile> {
        let index = self.tiles.iter().position(|t| t.id == id)?;
        Some(self.tiles.remove(index))
    }

    pub fn get(&self, id: Uuid) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.id == id)
    }

    /// All tiles with the given display name. Names are not unique.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tile> + 'a {
        self.tiles.iter().filter(move |t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::float_cmp)]

    use super::*;

    #[test]
    fn test_named_lookup() {
        let mut board = Soundboard::new();
        board.add(Tile::new("airhorn", "a.wav"));
        board.add(Tile::new("applause", "b.wav"));
        board.add(Tile::new("airhorn", "c.wav").with_volume(0.5));

        let files: Vec<_> = board.named("airhorn").map(|t| t.file.clone()).collect();
        assert_eq!(files, vec![PathBuf::from("a.wav"), PathBuf::from("c.wav")]);
        assert_eq!(board.named("nope").count(), 0);
    }

    #[test]
    fn test_remove_by_id() {
        let mut board = Soundboard::new();
        let id = board.add(Tile::new("drum", "d.wav"));
        assert!(board.get(id).is_some());
        assert_eq!(board.remove(id).unwrap().name, "drum");
        assert!(board.remove(id).is_none());
        assert!(board.tiles.is_empty());
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let board: Soundboard =
            serde_json::from_str(r#"{ "tiles": [ { "name": "x", "file": "x.wav" } ] }"#).unwrap();
        assert_eq!(board.tiles[0].volume, 1.0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");

        let mut board = Soundboard::new();
        board.add(Tile::new("bell", "bell.flac").with_volume(1.4));
        board.save(&path).unwrap();

        assert_eq!(Soundboard::load(&path).unwrap(), board);
    }
}
