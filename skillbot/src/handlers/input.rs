use super::{is_blank, parse_args, string_list, HandlerResult, StepFailure};
use crate::expression;
use crate::interpreter::Interpreter;
use crate::steps::{
    BringWindowToFrontArgs, GetWindowsInfoArgs, KeyInputArgs, MouseClickArgs, MouseMoveArgs,
    MouseScrollArgs, OpenAppArgs, TextInputArgs,
};
use crate::symbols::SCROLL_RESOLUTION;
use crate::types::{BoundBox, ClickKind, Point, ScreenRecord};
use serde_json::Value;
use tracing::{debug, info};

/// Keys a single Key Input step may press together.
const MAX_CHORD: usize = 4;

fn pair(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Array(items) if items.len() == 2 => Some((items[0].as_f64()?, items[1].as_f64()?)),
        Value::Object(map) => Some((
            map.get("x").and_then(|v| v.as_f64())?,
            map.get("y").and_then(|v| v.as_f64())?,
        )),
        _ => None,
    }
}

fn click_kind(action: &str, interval_ms: u64) -> Option<ClickKind> {
    let action = action.to_lowercase();
    if action.is_empty() || action.contains("single") || action == "click" {
        Some(ClickKind::Single)
    } else if action.contains("double") {
        Some(ClickKind::Double { interval_ms })
    } else if action.contains("triple") {
        Some(ClickKind::Triple)
    } else if action.contains("right") {
        Some(ClickKind::Right)
    } else {
        None
    }
}

/// Anchor point of `bbox` named by `from`, before offsets.
fn anchor_point(bbox: &BoundBox, from: &str) -> Point {
    let center = bbox.center();
    match from {
        "left" => Point::new(bbox.left, center.y),
        "right" => Point::new(bbox.right, center.y),
        "top" => Point::new(center.x, bbox.top),
        "bottom" => Point::new(center.x, bbox.bottom),
        _ => center,
    }
}

impl Interpreter {
    /// Bound box a Mouse Click aims at, by the step's addressing mode.
    fn click_target(&mut self, args: &MouseClickArgs) -> Result<BoundBox, StepFailure> {
        let name = expression::to_display_string(&args.target_name);
        let nth = self.number_of(&args.nth)?.unwrap_or(0.0).max(0.0) as usize;

        let found = match args.target_type.as_str() {
            "direct" => BoundBox::from_value(&args.target_name),
            "var name" => BoundBox::from_value(&self.read_target(&name)?),
            "expr" => BoundBox::from_value(&self.value_of(&args.target_name)?),
            "list" => {
                let list = self.read_target(&name)?;
                list.as_array().and_then(|items| items.get(nth)).and_then(|item| {
                    BoundBox::from_value(item)
                        .or_else(|| item.get("loc").and_then(BoundBox::from_value))
                })
            }
            kind => {
                let screen = if args.screen.trim().is_empty() {
                    crate::symbols::LAST_SCREEN
                } else {
                    args.screen.trim()
                };
                let records = ScreenRecord::list_from_value(&self.read_target(screen)?);
                records
                    .iter()
                    .filter(|r| r.name == name && (kind.is_empty() || r.kind == kind))
                    .nth(nth)
                    .map(ScreenRecord::bound_box)
            }
        };
        found.ok_or_else(|| {
            StepFailure::Invalid(format!(
                "click target '{}' ({}) not found",
                name, args.target_type
            ))
        })
    }

    pub(crate) async fn mouse_click(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: MouseClickArgs = parse_args(args)?;
        let bbox = self.click_target(&args)?;

        let (dx, dy) = pair(&args.offset).unwrap_or((0.0, 0.0));
        let (dx, dy) = if args.offset_unit == "box" {
            (dx * bbox.width() as f64, dy * bbox.height() as f64)
        } else {
            (dx, dy)
        };
        let window = self.collaborators.desktop.top_window_rect().await?;
        let point = anchor_point(&bbox, args.offset_from.as_str())
            .offset(dx.round() as i64, dy.round() as i64)
            .offset(window.x, window.y);

        let desktop = self.collaborators.desktop.clone();
        desktop.move_to(point).await?;
        let move_pause = self.seconds_of(&args.move_pause)?;
        self.pause(move_pause).await;

        let action = args.action.to_lowercase();
        if action.contains("drag") {
            let to = match BoundBox::from_value(&args.action_args) {
                Some(dest) => dest.center().offset(window.x, window.y),
                None => {
                    let (ox, oy) = pair(&args.action_args).ok_or_else(|| {
                        StepFailure::Invalid("drag needs a destination in action_args".into())
                    })?;
                    point.offset(ox as i64, oy as i64)
                }
            };
            desktop.drag_to(point, to).await?;
        } else {
            let interval_ms = (self.number_of(&args.action_args)?.unwrap_or(0.0) * 1000.0) as u64;
            let kind = click_kind(&action, interval_ms)
                .ok_or_else(|| StepFailure::Invalid(format!("unknown click action '{}'", args.action)))?;
            desktop.click(point, kind).await?;
        }
        info!("Mouse {} at ({}, {})", args.action, point.x, point.y);

        if let Some((mx, my)) = pair(&args.post_move) {
            desktop.move_to(point.offset(mx as i64, my as i64)).await?;
        }
        let post_wait = self.seconds_of(&args.post_wait)?;
        self.pause(post_wait).await;

        self.recovery.record(index + 1, &self.symbols);
        Ok(index + 1)
    }

    pub(crate) async fn mouse_scroll(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: MouseScrollArgs = parse_args(args)?;
        let amount = self
            .number_of(&args.amount)?
            .ok_or_else(|| StepFailure::Invalid("scroll amount missing".into()))?;
        let resolution = match self.number_of(&args.resolution)? {
            Some(r) => r,
            None => self.symbols.value(SCROLL_RESOLUTION).as_f64().unwrap_or(1.0),
        }
        .max(1.0);

        let mut units = if args.unit == "screen" {
            let window = self.collaborators.desktop.top_window_rect().await?;
            window.height as f64 * amount / 100.0 / resolution
        } else {
            amount
        };

        let lo = self.number_of(&args.random_min)?;
        let hi = self.number_of(&args.random_max)?;
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if hi > lo {
                units += self.random_between(lo, hi)?;
            }
        }

        let mut units = units.round() as i64;
        if args.action.to_lowercase().contains("down") {
            units = -units.abs();
        }
        debug!("Scroll {} units ({})", units, args.action);
        self.collaborators.desktop.scroll(units).await?;

        let postwait = self.seconds_of(&args.postwait)?;
        self.pause(postwait).await;
        Ok(index + 1)
    }

    pub(crate) async fn key_input(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: KeyInputArgs = parse_args(args)?;
        let keys: Vec<String> = args
            .action_value
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        match keys.len() {
            0 => return Err(StepFailure::Invalid("no keys given".into())),
            1 => self.collaborators.desktop.press(&keys[0]).await?,
            n if n <= MAX_CHORD => self.collaborators.desktop.hotkey(&keys).await?,
            n => {
                return Err(StepFailure::Invalid(format!(
                    "{n} keys in one chord; at most {MAX_CHORD} allowed"
                )))
            }
        }
        info!("Key input {:?}", keys);

        let wait = self.seconds_of(&args.wait_after)?;
        self.pause(wait).await;
        self.recovery.record(index + 1, &self.symbols);
        Ok(index + 1)
    }

    pub(crate) async fn text_input(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: TextInputArgs = parse_args(args)?;
        let text = match args.txt_ref_type.as_str() {
            "var" | "var name" => {
                let name = expression::to_display_string(&args.text);
                self.read_target(&name)?
            }
            "expr" => self.value_of(&args.text)?,
            _ => args.text.clone(),
        };
        let text = match text {
            Value::Array(items) => items.iter().map(expression::to_display_string).collect(),
            other => expression::to_display_string(&other),
        };

        let speed = self.seconds_of(&args.speed)?;
        self.collaborators.desktop.type_text(&text, speed).await?;
        debug!("Typed {} chars", text.chars().count());

        if !args.key_after.trim().is_empty() {
            self.collaborators
                .desktop
                .press(&args.key_after.trim().to_lowercase())
                .await?;
        }
        let wait = self.seconds_of(&args.wait_after)?;
        self.pause(wait).await;
        self.recovery.record(index + 1, &self.symbols);
        Ok(index + 1)
    }

    pub(crate) async fn open_app(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: OpenAppArgs = parse_args(args)?;
        let cargs = if args.cargs_type == "direct" || is_blank(&args.cargs) {
            string_list(&args.cargs)
        } else {
            let mut values = Vec::new();
            for name in string_list(&args.cargs) {
                values.push(expression::to_display_string(&self.read_target(&name)?));
            }
            values
        };

        info!("Open app '{}' ({}) {:?}", args.app_link, args.app_type, cargs);
        self.collaborators
            .desktop
            .open_app(&args.app_link, &cargs)
            .await?;

        let wait = self.seconds_of(&args.wait)?;
        self.pause(wait).await;
        self.store(&args.result, Value::Bool(true))?;
        Ok(index + 1)
    }

    pub(crate) async fn mouse_move(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: MouseMoveArgs = parse_args(args)?;
        let to_x = self.number_of(&args.x_destination_var)?;
        let to_y = self.number_of(&args.y_destination_var)?;
        match (to_x, to_y) {
            (None, None) => {
                let dx = self.number_of(&args.x_amount_var)?.unwrap_or(0.0).round() as i64;
                let dy = self.number_of(&args.y_amount_var)?.unwrap_or(0.0).round() as i64;
                debug!("Mouse move by ({}, {})", dx, dy);
                self.collaborators.desktop.move_by(dx, dy).await?;
            }
            (Some(x), Some(y)) => {
                let point = Point::new(x.round() as i64, y.round() as i64);
                debug!("Mouse move to {:?}", point);
                self.collaborators.desktop.move_to(point).await?;
            }
            _ => {
                return Err(StepFailure::Invalid(
                    "mouse move needs both x and y destinations".into(),
                ))
            }
        }

        let postwait = self.seconds_of(&args.postwait)?;
        self.pause(postwait).await;
        Ok(index + 1)
    }

    pub(crate) async fn get_windows_info(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: GetWindowsInfoArgs = parse_args(args)?;
        let nth = self.number_of(&args.nth_var)?;

        let listed = self.collaborators.desktop.list_windows().await;
        let windows = match listed {
            Ok(windows) => windows,
            Err(e) => {
                self.store(&args.flag_var, Value::Bool(false))?;
                return Err(e.into());
            }
        };
        let picked = match nth {
            None => windows,
            Some(n) => {
                let Some(window) = usize::try_from(n as i64)
                    .ok()
                    .and_then(|n| windows.into_iter().nth(n))
                else {
                    self.store(&args.flag_var, Value::Bool(false))?;
                    return Err(StepFailure::Invalid(format!("no window at position {n}")));
                };
                vec![window]
            }
        };

        info!(
            "Windows: {:?}",
            picked.iter().map(|w| w.title.as_str()).collect::<Vec<_>>()
        );
        let found = serde_json::to_value(&picked)?;
        self.store(&args.results_var, found)?;
        self.store(&args.flag_var, Value::Bool(true))?;
        Ok(index + 1)
    }

    pub(crate) async fn bring_window_to_front(
        &mut self,
        index: usize,
        args: &Value,
    ) -> HandlerResult {
        let args: BringWindowToFrontArgs = parse_args(args)?;
        let title = expression::to_display_string(&self.read_target(&args.title_var)?);
        match self.collaborators.desktop.bring_to_front(&title).await {
            Ok(()) => {
                info!("Brought '{}' to front", title);
                self.store(&args.flag_var, Value::Bool(true))?;
                Ok(index + 1)
            }
            Err(e) => {
                self.store(&args.flag_var, Value::Bool(false))?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn click_actions_map_to_kinds() {
        assert_eq!(click_kind("Single Click", 0), Some(ClickKind::Single));
        assert_eq!(
            click_kind("Double Click", 120),
            Some(ClickKind::Double { interval_ms: 120 })
        );
        assert_eq!(click_kind("Right Click", 0), Some(ClickKind::Right));
        assert_eq!(click_kind("hover", 0), None);
    }

    #[test]
    fn anchor_points_sit_on_box_edges() {
        let bbox = BoundBox::from_loc([100, 10, 140, 50]);
        assert_eq!(anchor_point(&bbox, "center"), Point::new(30, 120));
        assert_eq!(anchor_point(&bbox, "left"), Point::new(10, 120));
        assert_eq!(anchor_point(&bbox, "bottom"), Point::new(30, 140));
    }

    #[test]
    fn offsets_accept_pairs_and_objects() {
        assert_eq!(pair(&json!([1, -2])), Some((1.0, -2.0)));
        assert_eq!(pair(&json!({"x": 3, "y": 4})), Some((3.0, 4.0)));
        assert_eq!(pair(&json!("nope")), None);
    }
}
