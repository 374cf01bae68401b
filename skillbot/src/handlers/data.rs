use super::{duration_from_secs, is_blank, parse_args, string_list, HandlerResult, StepFailure};
use crate::expression;
use crate::interpreter::Interpreter;
use crate::steps::{
    CallExternArgs, CheckExistenceArgs, CreateDataArgs, CreateDirArgs, DataFileArgs,
    DeleteFileArgs, FillDataArgs, ListDirArgs, ReadFileArgs, TextToNumberArgs, WaitArgs,
    WaitUntilArgs, WriteFileArgs,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often Wait Until re-checks its events.
const WAIT_UNTIL_POLL: Duration = Duration::from_secs(1);

/// JSON-looking text becomes structured data; anything else stays as is.
fn parse_if_json(value: Value) -> Value {
    match &value {
        Value::String(s) => {
            let t = s.trim();
            let looks_structured = (t.starts_with('{') && t.ends_with('}'))
                || (t.starts_with('[') && t.ends_with(']'));
            if looks_structured {
                serde_json::from_str(t).unwrap_or(value)
            } else {
                value
            }
        }
        _ => value,
    }
}

/// Parse the first word of `text` as a number. `$ # % ,` are ignored and a
/// `%` sign divides by one hundred.
pub(crate) fn text_to_number(text: &str) -> Option<Value> {
    let word = text.split_whitespace().next()?;
    let percent = word.contains('%');
    let cleaned: String = word
        .chars()
        .filter(|c| !matches!(c, '$' | '#' | '%' | ','))
        .collect();
    if percent {
        let n: f64 = cleaned.parse().ok()?;
        return Some(Value::from(n / 100.0));
    }
    if let Ok(n) = cleaned.parse::<i64>() {
        return Some(Value::from(n));
    }
    cleaned.parse::<f64>().ok().map(Value::from)
}

fn empty_like(value: &Value) -> Value {
    match value {
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(_) => Value::Object(Map::new()),
        Value::String(_) => Value::String(String::new()),
        _ => Value::Null,
    }
}

impl Interpreter {
    pub(crate) fn create_data(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: CreateDataArgs = parse_args(args)?;
        let name = args.data_name.trim();
        if name.is_empty() {
            return Err(StepFailure::Invalid("data_name is empty".into()));
        }

        let value = if args.key_name == "NA" {
            match (&args.data_type[..], &args.key_value) {
                ("expr", Value::String(source)) => self.symbols.evaluate(source)?,
                _ => args.key_value.clone(),
            }
        } else {
            let mut map = Map::new();
            map.insert(args.key_name.clone(), parse_if_json(args.key_value.clone()));
            Value::Object(map)
        };

        debug!("Create '{}' = {}", name, value);
        self.symbols.declare(name, value);
        Ok(index + 1)
    }

    pub(crate) fn fill_data(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: FillDataArgs = parse_args(args)?;
        let to = args.to.trim();
        if to.is_empty() {
            return Err(StepFailure::Invalid("'to' is empty".into()));
        }

        match args.fill_type.as_str() {
            "copy" => {
                let source = match &args.from {
                    Value::String(name) => self.read_target(name)?,
                    other => other.clone(),
                };
                self.write_target(to, source)?;
            }
            "append" | "prepend" => {
                let item = self.value_of(&args.from)?;
                let list = match self.read_target(to)? {
                    Value::Array(mut items) => {
                        if args.fill_type == "append" {
                            items.push(item);
                        } else {
                            items.insert(0, item);
                        }
                        Value::Array(items)
                    }
                    Value::Null => Value::Array(vec![item]),
                    other => {
                        return Err(StepFailure::Invalid(format!(
                            "cannot {} to {}",
                            args.fill_type, other
                        )))
                    }
                };
                self.write_target(to, list)?;
            }
            "merge" => {
                let extra = self.value_of(&args.from)?;
                let current = self.read_target(to)?;
                let merged = match (current, extra) {
                    (Value::Array(mut a), Value::Array(b)) => {
                        a.extend(b);
                        Value::Array(a)
                    }
                    (Value::Object(mut a), Value::Object(b)) => {
                        a.extend(b);
                        Value::Object(a)
                    }
                    (Value::Null, extra) => extra,
                    (current, extra) => {
                        return Err(StepFailure::Invalid(format!(
                            "cannot merge {extra} into {current}"
                        )))
                    }
                };
                self.write_target(to, merged)?;
            }
            "clear" => {
                let current = self.read_target(to)?;
                self.write_target(to, empty_like(&current))?;
            }
            "pop" => {
                let mut current = self.read_target(to)?;
                let Value::Array(items) = &mut current else {
                    return Err(StepFailure::Invalid(format!("'{to}' is not a list")));
                };
                if items.is_empty() {
                    return Err(StepFailure::Invalid(format!("pop from empty list '{to}'")));
                }
                let at = self.number_of(&args.from)?.map(|n| n as i64).unwrap_or(-1);
                let len = items.len() as i64;
                let position = if at < 0 { len + at } else { at };
                if position < 0 || position >= len {
                    return Err(StepFailure::Invalid(format!(
                        "pop index {at} out of range for '{to}'"
                    )));
                }
                let popped = items.remove(position as usize);
                self.write_target(to, current)?;
                self.store(&args.result, popped)?;
            }
            "pop_key" => {
                let key = match &args.from {
                    Value::String(s) => s.clone(),
                    other => expression::to_display_string(other),
                };
                let mut current = self.read_target(to)?;
                let Value::Object(map) = &mut current else {
                    return Err(StepFailure::Invalid(format!("'{to}' is not a mapping")));
                };
                let popped = map.remove(&key).unwrap_or(Value::Null);
                self.write_target(to, current)?;
                self.store(&args.result, popped)?;
            }
            // "assign", "direct" and anything unrecognised
            _ => {
                let value = self.value_of(&args.from)?;
                self.write_target(to, value)?;
            }
        }
        Ok(index + 1)
    }

    pub(crate) fn load_data(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: DataFileArgs = parse_args(args)?;
        let text = std::fs::read_to_string(&args.file_link)?;
        let value: Value = serde_json::from_str(&text)?;
        info!("Loaded '{}' from {}", args.data_name, args.file_link);
        self.symbols.declare(args.data_name.trim(), value);
        Ok(index + 1)
    }

    pub(crate) fn save_data(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: DataFileArgs = parse_args(args)?;
        let value = self.read_target(&args.data_name)?;
        let path = Path::new(&args.file_link);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
        info!("Saved '{}' to {}", args.data_name, path.display());
        Ok(index + 1)
    }

    pub(crate) fn list_dir(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: ListDirArgs = parse_args(args)?;
        let extension = args.extension.trim().trim_start_matches('.').to_lowercase();
        let cutoff = self.number_of(&args.most_recent)?.map(|hours| {
            Utc::now() - chrono::Duration::seconds((hours * 3600.0) as i64)
        });

        let mut files: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
        for entry in std::fs::read_dir(&args.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let path = entry.path();
            if !extension.is_empty() {
                let matches = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase() == extension)
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            let modified: DateTime<Utc> = meta.modified()?.into();
            if cutoff.is_some_and(|c| modified < c) {
                continue;
            }
            files.push((path, modified));
        }

        if args.sort_by == "time" {
            files.sort_by_key(|(_, t)| *t);
        } else {
            files.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        if args.sort_order == "max-min" {
            files.reverse();
        }

        let listing: Vec<Value> = files
            .into_iter()
            .map(|(p, _)| Value::String(p.display().to_string()))
            .collect();
        debug!("List dir {} -> {} files", args.dir, listing.len());
        self.store(&args.result, Value::Array(listing))?;
        Ok(index + 1)
    }

    pub(crate) fn check_existence(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: CheckExistenceArgs = parse_args(args)?;
        let path = if args.fntype.contains("var") {
            expression::to_display_string(&self.read_target(&args.file)?)
        } else {
            args.file.clone()
        };
        let path = Path::new(&path);
        let exists = if args.fntype.contains("dir") {
            path.is_dir()
        } else {
            path.is_file()
        };
        debug!("{} exists: {}", path.display(), exists);
        self.store(&args.result, Value::Bool(exists))?;
        Ok(index + 1)
    }

    /// `raw` itself when `name_type` is `"direct"`, else what it evaluates to.
    fn path_of(&mut self, raw: &str, name_type: &str) -> Result<PathBuf, StepFailure> {
        if name_type == "direct" {
            return Ok(PathBuf::from(raw.trim()));
        }
        let value = self.symbols.evaluate(raw)?;
        Ok(PathBuf::from(expression::to_display_string(&value)))
    }

    pub(crate) fn create_dir(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: CreateDirArgs = parse_args(args)?;
        let dir = self.path_of(&args.dir, &args.name_type)?;
        if dir.is_dir() {
            debug!("{} already exists", dir.display());
        } else {
            std::fs::create_dir_all(&dir)?;
            info!("Created {}", dir.display());
        }
        self.store(&args.result, Value::String(dir.display().to_string()))?;
        Ok(index + 1)
    }

    /// A missing file clears the sink and the flag without failing the step.
    pub(crate) fn read_file(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: ReadFileArgs = parse_args(args)?;
        let path = self.path_of(&args.filename, &args.name_type)?;
        self.store(&args.datasink, Value::String(String::new()))?;

        if !path.is_file() {
            warn!("Read file: {} does not exist", path.display());
            self.store(&args.flag, Value::Bool(false))?;
            return Ok(index + 1);
        }
        let read = std::fs::read_to_string(&path)
            .map_err(StepFailure::from)
            .and_then(|text| {
                if args.filetype == "json" {
                    Ok(serde_json::from_str(&text)?)
                } else {
                    Ok(Value::String(text))
                }
            });
        match read {
            Ok(content) => {
                info!("Read {}", path.display());
                self.store(&args.datasink, content)?;
                self.store(&args.flag, Value::Bool(true))?;
                Ok(index + 1)
            }
            Err(e) => {
                self.store(&args.flag, Value::Bool(false))?;
                Err(e)
            }
        }
    }

    pub(crate) fn write_file(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: WriteFileArgs = parse_args(args)?;
        let path = self.path_of(&args.filename, &args.name_type)?;
        let data = self.read_target(&args.datasource)?;
        let content = match (args.filetype.as_str(), &data) {
            ("json", _) => serde_json::to_string_pretty(&data)?,
            ("txt", Value::Array(items)) => {
                items.iter().map(expression::to_display_string).collect()
            }
            _ => expression::to_display_string(&data),
        };

        let written = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            if args.mode == "overwrite" {
                std::fs::write(&path, &content)
            } else {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?
                    .write_all(content.as_bytes())
            }
        })();
        if let Err(e) = written {
            self.store(&args.result, Value::Bool(false))?;
            return Err(e.into());
        }
        info!(
            "Wrote {} bytes to {} ({})",
            content.len(),
            path.display(),
            if args.mode == "overwrite" { "overwrite" } else { "append" }
        );
        self.store(&args.result, Value::Bool(true))?;
        Ok(index + 1)
    }

    /// Deleting a file that is already gone only warns.
    pub(crate) fn delete_file(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: DeleteFileArgs = parse_args(args)?;
        let path = self.path_of(&args.filename, &args.name_type)?;
        if path.is_file() {
            std::fs::remove_file(&path)?;
            info!("Deleted {}", path.display());
        } else {
            warn!("Delete file: {} does not exist", path.display());
        }
        self.store(&args.result, Value::Bool(true))?;
        Ok(index + 1)
    }

    pub(crate) fn text_to_number(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: TextToNumberArgs = parse_args(args)?;
        let text = expression::to_display_string(&self.read_target(&args.intext)?);
        let number = text_to_number(&text)
            .ok_or_else(|| StepFailure::Invalid(format!("no number in '{text}'")))?;
        self.store(&args.numvar, number)?;
        Ok(index + 1)
    }

    pub(crate) async fn call_extern(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: CallExternArgs = parse_args(args)?;

        if args.entity == "in_line" {
            let result = self.symbols.execute(&args.file)?;
            self.store(&args.output, result)?;
            return Ok(index + 1);
        }

        let names = match parse_if_json(args.args.clone()) {
            Value::Array(items) => items
                .iter()
                .map(expression::to_display_string)
                .collect::<Vec<_>>(),
            other => string_list(&other),
        };
        let mut argv = Vec::with_capacity(names.len());
        for name in &names {
            argv.push(expression::to_display_string(&self.read_target(name)?));
        }

        info!(
            "Call extern: {} {} ({} args)",
            self.config.extern_program,
            args.file,
            argv.len()
        );
        let output = tokio::process::Command::new(&self.config.extern_program)
            .arg(&args.file)
            .args(&argv)
            .output()
            .await?;
        if !output.status.success() {
            return Err(StepFailure::Invalid(format!(
                "{} exited with {}: {}",
                args.file,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let result = serde_json::from_str(&stdout).unwrap_or(Value::String(stdout));
        self.store(&args.output, result)?;
        Ok(index + 1)
    }

    pub(crate) async fn wait(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: WaitArgs = parse_args(args)?;
        let duration = if !is_blank(&args.time) {
            self.seconds_of(&args.time)?
        } else {
            let lo = self.number_of(&args.random_min)?.unwrap_or(0.0).max(0.0);
            let hi = self.number_of(&args.random_max)?.unwrap_or(lo).max(0.0);
            let secs = self.random_between(lo, hi)?;
            duration_from_secs(secs)?
        };
        debug!("Wait {:?}", duration);
        self.pause(duration).await;
        Ok(index + 1)
    }

    /// Re-checks the events every poll until they hold, the time-out passes
    /// or the mission is cancelled. `result` gets a status line either way.
    pub(crate) async fn wait_until(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: WaitUntilArgs = parse_args(args)?;
        let events = string_list(&args.events);
        let time_out = self.seconds_of(&args.time_out)?;
        let need_all = args.events_relation == "all";
        let cancel = self.cancel.clone();
        let started = tokio::time::Instant::now();

        let received = loop {
            let mut held = Vec::with_capacity(events.len());
            for event in &events {
                held.push(self.symbols.evaluate_condition(event)?);
            }
            let met = if need_all {
                held.iter().all(|h| *h)
            } else {
                held.iter().any(|h| *h)
            };
            if met {
                break true;
            }

            let elapsed = started.elapsed();
            if elapsed >= time_out {
                break false;
            }
            let nap = WAIT_UNTIL_POLL.min(time_out - elapsed);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = cancel.cancelled() => break false,
            }
        };

        let status = if received {
            "Completed:Event Received"
        } else {
            "Error:Timed Out"
        };
        info!("Wait until {:?} ({}): {}", events, args.events_relation, status);
        self.store(&args.result, Value::String(status.to_string()))?;
        self.store(&args.flag, Value::Bool(received))?;
        Ok(index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_to_number_strips_currency_and_percent() {
        assert_eq!(text_to_number("$1,299 total"), Some(json!(1299)));
        assert_eq!(text_to_number("#12.5"), Some(json!(12.5)));
        assert_eq!(text_to_number("45% off"), Some(json!(0.45)));
        assert_eq!(text_to_number("n/a"), None);
        assert_eq!(text_to_number(""), None);
    }

    #[test]
    fn json_text_is_parsed_only_when_structured() {
        assert_eq!(parse_if_json(json!("[1, 2]")), json!([1, 2]));
        assert_eq!(parse_if_json(json!("{\"a\": 1}")), json!({"a": 1}));
        assert_eq!(parse_if_json(json!("plain")), json!("plain"));
        assert_eq!(parse_if_json(json!("[broken")), json!("[broken"));
    }
}
