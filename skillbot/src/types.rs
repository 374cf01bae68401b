//! Common types shared by handlers and collaborators

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of records a screen provider can report.
pub const RECORD_KINDS: &[&str] = &[
    "anchor text",
    "anchor icon",
    "info",
    "info 1",
    "info 2",
    "paragraph",
    "full page",
    "word stats",
];

/// One region of the analysed top-most window.
///
/// `loc` is always `(top, left, bottom, right)` in window pixels. Providers that
/// work in another order must convert before handing records to the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub loc: [i64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txt_struct: Option<Value>,
}

impl ScreenRecord {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, loc: [i64; 4]) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            loc,
            text: None,
            txt_struct: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn bound_box(&self) -> BoundBox {
        BoundBox::from_loc(self.loc)
    }

    /// Parse a list of records stored in the symbol table. Entries that do not
    /// look like records are skipped.
    pub fn list_from_value(value: &Value) -> Vec<ScreenRecord> {
        match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// An axis-aligned box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl BoundBox {
    /// Build from a screen `loc` in `(top, left, bottom, right)` order.
    pub fn from_loc(loc: [i64; 4]) -> Self {
        Self {
            top: loc[0],
            left: loc[1],
            bottom: loc[2],
            right: loc[3],
        }
    }

    /// Accepts either a `loc` array or an object with `left/top/right/bottom`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) if items.len() == 4 => {
                let mut loc = [0i64; 4];
                for (slot, item) in loc.iter_mut().zip(items) {
                    *slot = item.as_f64()? as i64;
                }
                Some(Self::from_loc(loc))
            }
            Value::Object(map) => {
                let get = |k: &str| map.get(k).and_then(|v| v.as_f64()).map(|f| f as i64);
                Some(Self {
                    left: get("left")?,
                    top: get("top")?,
                    right: get("right")?,
                    bottom: get("bottom")?,
                })
            }
            _ => None,
        }
    }

    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn to_loc_value(&self) -> Value {
        serde_json::json!([self.top, self.left, self.bottom, self.right])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: i64, dy: i64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Window rectangle reported by the desktop driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// A visible top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    pub rect: WindowRect,
}

impl WindowInfo {
    pub fn new(title: impl Into<String>, rect: WindowRect) -> Self {
        Self {
            title: title.into(),
            rect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClickKind {
    Single,
    Double { interval_ms: u64 },
    Triple,
    Right,
}

impl std::fmt::Display for ClickKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClickKind::Single => write!(f, "single"),
            ClickKind::Double { .. } => write!(f, "double"),
            ClickKind::Triple => write!(f, "triple"),
            ClickKind::Right => write!(f, "right"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loc_is_top_left_bottom_right() {
        let bb = BoundBox::from_loc([10, 20, 30, 60]);
        assert_eq!(bb.left, 20);
        assert_eq!(bb.top, 10);
        assert_eq!(bb.width(), 40);
        assert_eq!(bb.height(), 20);
        assert_eq!(bb.center(), Point::new(40, 20));
    }

    #[test]
    fn bound_box_from_object_and_array() {
        let from_obj = BoundBox::from_value(&json!({"left": 1, "top": 2, "right": 3, "bottom": 4}));
        let from_arr = BoundBox::from_value(&json!([2, 1, 4, 3]));
        assert_eq!(from_obj, from_arr);
        assert!(BoundBox::from_value(&json!("nope")).is_none());
    }

    #[test]
    fn records_parse_from_symbol_values() {
        let value = json!([
            {"name": "marker", "type": "anchor text", "loc": [0, 0, 10, 10]},
            {"garbage": true}
        ]);
        let records = ScreenRecord::list_from_value(&value);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "anchor text");
    }
}
