use super::{parse_args, string_list, HandlerResult, StepFailure};
use crate::interpreter::Interpreter;
use crate::platforms::ScreenRequest;
use crate::steps::{
    CalibrateScrollArgs, ExtractInfoArgs, SaveHtmlArgs, SearchArgs, SearchScrollArgs,
    SearchWordLineArgs, TextLineLocationArgs,
};
use crate::symbols::{LAST_SCREEN, NET_CONNECTED, SCROLL_RESOLUTION};
use crate::types::{BoundBox, ScreenRecord};
use regex::Regex;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info, warn};

fn records_to_value(records: &[&ScreenRecord]) -> Value {
    Value::Array(
        records
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect(),
    )
}

/// Vertical centre of a stored record, bound box or `[x, y]` point.
fn vertical_position(value: &Value) -> Option<i64> {
    if let Value::Array(point) = value {
        if point.len() == 2 {
            return point[1].as_f64().map(|y| y.round() as i64);
        }
    }
    if let Ok(record) = serde_json::from_value::<ScreenRecord>(value.clone()) {
        return Some(record.bound_box().center().y);
    }
    BoundBox::from_value(value).map(|b| b.center().y)
}

fn file_stem_part(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl Interpreter {
    fn screen_records(&mut self, screen: &str) -> Result<Vec<ScreenRecord>, StepFailure> {
        let name = if screen.trim().is_empty() {
            LAST_SCREEN
        } else {
            screen.trim()
        };
        Ok(ScreenRecord::list_from_value(&self.read_target(name)?))
    }

    pub(crate) async fn extract_info(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: ExtractInfoArgs = parse_args(args)?;

        let image = self.config.work_dir.join(format!(
            "{}_{}_{}.png",
            file_stem_part(&args.page),
            file_stem_part(&args.section),
            index
        ));
        let request = ScreenRequest {
            image: Some(image.clone()),
            page: args.page.clone(),
            section: args.section.clone(),
            theme: args.theme.clone(),
            page_data_info: args.page_data_info.clone(),
            win_title_kw: args.win_title_kw.clone(),
            settings: args.settings.clone(),
            options: args.options.clone(),
        };

        let read = async {
            self.collaborators.desktop.capture_screen(&image).await?;
            self.collaborators.screen.read_screen(&request).await
        }
        .await;

        let records = match read {
            Ok(records) => records,
            Err(e) => {
                self.store(&args.data_sink, Value::Array(Vec::new()))?;
                self.store(&args.status, Value::Bool(false))?;
                return Err(e.into());
            }
        };

        info!(
            "Extract info page='{}' section='{}': {} records",
            args.page,
            args.section,
            records.len()
        );
        let all: Vec<&ScreenRecord> = records.iter().collect();
        let value = records_to_value(&all);
        self.symbols.set(LAST_SCREEN, value.clone());
        self.store(&args.data_sink, value)?;
        self.store(&args.status, Value::Bool(!records.is_empty()))?;
        Ok(index + 1)
    }

    pub(crate) async fn save_html(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: SaveHtmlArgs = parse_args(args)?;
        let path = if args.local.trim().is_empty() {
            self.config.work_dir.join(format!("page_{index}.html"))
        } else {
            PathBuf::from(args.local.trim())
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        self.collaborators.desktop.save_page(&path).await?;
        let data = self
            .collaborators
            .scraper
            .scrape(&path, &args.template)
            .await?;
        info!("Saved page to {} and scraped it", path.display());
        self.store(&args.data_sink, data)?;
        Ok(index + 1)
    }

    pub(crate) async fn search(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: SearchArgs = parse_args(args)?;
        let records = self.screen_records(&args.screen)?;

        let names = if args.name_type == "direct" {
            string_list(&args.names)
        } else {
            match &args.names {
                Value::String(source) => string_list(&self.symbols.evaluate(source)?),
                other => string_list(other),
            }
        };
        let types = string_list(&args.target_types);

        let found: Vec<&ScreenRecord> = records
            .iter()
            .filter(|r| names.contains(&r.name))
            .filter(|r| types.is_empty() || types.contains(&r.kind))
            .collect();
        let status = if args.logic == "all" {
            !names.is_empty() && names.iter().all(|n| found.iter().any(|r| &r.name == n))
        } else {
            !found.is_empty()
        };
        debug!(
            "Search {:?} ({}) -> {} hits, status {}",
            names,
            args.logic,
            found.len(),
            status
        );
        self.store(&args.result, records_to_value(&found))?;
        self.store(&args.status, Value::Bool(status))?;

        if found.is_empty() {
            self.check_for_fault(index, &records, &args.site).await;
        }
        Ok(index + 1)
    }

    /// After an empty search: a fault anchor on screen or a failed ping
    /// raises an exception for the recovery layer.
    async fn check_for_fault(&mut self, index: usize, records: &[ScreenRecord], site: &str) {
        let fault = records
            .iter()
            .find(|r| self.recovery.config.fault_names.contains(&r.name))
            .map(|r| r.name.clone());
        let site = if site.trim().is_empty() {
            self.recovery.config.reference_site.clone()
        } else {
            site.trim().to_string()
        };
        let reachable = self.collaborators.ping.ping(&site).await.is_some();
        self.symbols.set_flag(NET_CONNECTED, reachable);

        let cause = match (fault, reachable) {
            (Some(name), _) => name,
            (None, false) => "site_unreachable".to_string(),
            (None, true) => return,
        };
        self.recovery.raise(
            &cause,
            json!({"site": site, "reachable": reachable}),
            index,
            &mut self.symbols,
        );
    }

    pub(crate) fn search_word_line(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: SearchWordLineArgs = parse_args(args)?;
        let records = self.screen_records(&args.screen)?;
        let sources = match &args.patterns {
            Value::String(single) => vec![single.clone()],
            other => string_list(other),
        };
        let patterns = sources
            .iter()
            .map(|p| Regex::new(p).map_err(|e| StepFailure::Invalid(format!("bad pattern '{p}': {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let mut hits = Vec::new();
        let mut matched = vec![false; patterns.len()];
        for record in &records {
            let text = record.text.as_deref().unwrap_or(&record.name);
            let mut matches = Vec::new();
            for (i, re) in patterns.iter().enumerate() {
                for m in re.find_iter(text) {
                    matched[i] = true;
                    matches.push(Value::String(m.as_str().to_string()));
                }
            }
            if !matches.is_empty() {
                hits.push(json!({
                    "name": record.name,
                    "loc": record.loc,
                    "text": text,
                    "matches": matches,
                }));
            }
        }

        let status = if args.logic == "all" {
            !matched.is_empty() && matched.iter().all(|m| *m)
        } else {
            matched.iter().any(|m| *m)
        };
        self.store(&args.result, Value::Array(hits))?;
        self.store(&args.status, Value::Bool(status))?;
        Ok(index + 1)
    }

    pub(crate) async fn search_scroll(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: SearchScrollArgs = parse_args(args)?;
        let records = self.screen_records(&args.screen)?;
        let target = records
            .iter()
            .find(|r| r.name == args.target && (args.target_type.is_empty() || r.kind == args.target_type));

        let Some(target) = target else {
            warn!("Search scroll: '{}' not on screen", args.target);
            self.store(&args.flag, Value::Bool(false))?;
            return Ok(index + 1);
        };

        let window = self.collaborators.desktop.top_window_rect().await?;
        let percent = self.number_of(&args.target_loc)?.unwrap_or(50.0);
        let desired = (window.height as f64 * percent / 100.0) as i64;
        let current = target.bound_box().center().y;

        let resolution = match self.number_of(&args.resolution)? {
            Some(r) => r,
            None => self.symbols.value(SCROLL_RESOLUTION).as_f64().unwrap_or(1.0),
        }
        .max(1.0);
        // content below the desired line needs a downward (negative) scroll
        let units = -((current - desired) as f64 / resolution).round() as i64;
        if units != 0 {
            self.collaborators.desktop.scroll(units).await?;
        }
        debug!(
            "Search scroll '{}': y {} -> {} ({} units)",
            args.target, current, desired, units
        );

        let postwait = self.seconds_of(&args.postwait)?;
        self.pause(postwait).await;
        self.store(&args.flag, Value::Bool(true))?;
        self.recovery.record(index + 1, &self.symbols);
        Ok(index + 1)
    }

    /// Pixels moved per scroll unit, from how far a marker travelled after a
    /// scroll of `amount` units.
    pub(crate) fn calibrate_scroll(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: CalibrateScrollArgs = parse_args(args)?;
        let amount = self
            .number_of(&args.amount)?
            .filter(|a| a.is_finite() && *a != 0.0)
            .ok_or_else(|| StepFailure::Invalid("calibration needs a non-zero amount".into()))?;
        let marker = args.marker.trim();
        if marker.is_empty() {
            return Err(StepFailure::Invalid("calibration marker is empty".into()));
        }

        let before = self.read_target(&args.last_record)?;
        let before_y = vertical_position(&before).ok_or_else(|| {
            StepFailure::Invalid(format!("'{}' holds no location", args.last_record))
        })?;
        let records = self.screen_records(&args.screen)?;
        let found = records
            .iter()
            .find(|r| r.name == marker || r.text.as_deref().is_some_and(|t| t.contains(marker)))
            .ok_or_else(|| {
                StepFailure::Invalid(format!("calibration marker '{marker}' not on screen"))
            })?;

        let moved = (found.bound_box().center().y - before_y).abs() as f64;
        let resolution = moved / amount.abs();
        let sink = if args.data_sink.trim().is_empty() {
            SCROLL_RESOLUTION
        } else {
            args.data_sink.trim()
        };
        info!(
            "Scroll calibration: '{}' moved {}px over {} units -> {} px/unit in '{}'",
            marker, moved, amount, resolution, sink
        );
        self.store(sink, Value::from(resolution))?;
        Ok(index + 1)
    }

    pub(crate) fn text_line_location(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: TextLineLocationArgs = parse_args(args)?;
        if args.text.trim().is_empty() {
            return Err(StepFailure::Invalid("'text' is empty".into()));
        }
        let records = self.screen_records(&args.screen)?;
        let line = records.iter().find(|r| {
            r.text
                .as_deref()
                .map(|t| t.contains(&args.text))
                .unwrap_or(false)
                || r.name.contains(&args.text)
        });

        match line {
            Some(record) => {
                self.store(&args.to, record.bound_box().to_loc_value())?;
                Ok(index + 1)
            }
            None => {
                self.store(&args.to, Value::Null)?;
                Err(StepFailure::Invalid(format!(
                    "no line containing '{}'",
                    args.text
                )))
            }
        }
    }
}
