//! Subtitle style state
//!
//! The style payload replicated to overlay contexts. Field names follow the
//! wire format of style-update messages; styling behavior itself lives in the
//! rendering layer and is out of scope here.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Vertical placement of the caption block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Top,
    Center,
    Bottom,
}

/// Horizontal alignment of caption text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// Presentation settings for the caption overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleStyle {
    pub font_family: String,
    pub font_size: u32,
    pub text_color: String,
    pub background_color: String,
    pub text_outline: bool,
    pub outline_color: String,
    pub position: Position,
    pub max_lines: u32,
    pub text_align: TextAlign,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_family: "Arial, sans-serif".to_string(),
            font_size: 48,
            text_color: "#FFFFFF".to_string(),
            background_color: "transparent".to_string(),
            text_outline: true,
            outline_color: "#000000".to_string(),
            position: Position::Bottom,
            max_lines: 2,
            text_align: TextAlign::Center,
        }
    }
}

/// Observable style handle shared between the UI and the broadcast producer.
pub struct StyleStore {
    tx: watch::Sender<SubtitleStyle>,
}

impl Default for StyleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SubtitleStyle::default());
        Self { tx }
    }

    pub fn get(&self) -> SubtitleStyle {
        self.tx.borrow().clone()
    }

    pub fn set(&self, style: SubtitleStyle) {
        let _ = self.tx.send(style);
    }

    pub fn subscribe(&self) -> watch::Receiver<SubtitleStyle> {
        self.tx.subscribe()
    }
}
