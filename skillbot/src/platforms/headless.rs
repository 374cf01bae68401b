use super::{DesktopDriver, ExternalOp, HtmlScraper, Pinger, ScreenProvider, ScreenRequest};
use crate::errors::PlatformError;
use crate::symbols::SymbolTable;
use crate::types::{ClickKind, Point, ScreenRecord, WindowInfo, WindowRect};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// A desktop action as the headless driver saw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DesktopAction {
    MoveTo { point: Point },
    MoveBy { dx: i64, dy: i64 },
    Click { point: Point, kind: String },
    DragTo { from: Point, to: Point },
    Scroll { units: i64 },
    Hotkey { keys: Vec<String> },
    Press { key: String },
    TypeText { text: String, interval_ms: u64 },
    CaptureScreen { path: String },
    SavePage { path: String },
    OpenApp { link: String, args: Vec<String> },
    BringToFront { title: String },
}

/// Records every action instead of performing it.
#[derive(Debug)]
pub struct HeadlessDesktop {
    window: WindowRect,
    windows: Vec<WindowInfo>,
    actions: Mutex<Vec<DesktopAction>>,
}

impl Default for HeadlessDesktop {
    fn default() -> Self {
        Self::new(WindowRect {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        })
    }
}

impl HeadlessDesktop {
    pub fn new(window: WindowRect) -> Self {
        Self {
            window,
            windows: vec![WindowInfo::new("headless", window)],
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Replace the window list; the first entry is the top window.
    pub fn with_windows(mut self, windows: Vec<WindowInfo>) -> Self {
        if let Some(top) = windows.first() {
            self.window = top.rect;
        }
        self.windows = windows;
        self
    }

    pub fn actions(&self) -> Vec<DesktopAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn record(&self, action: DesktopAction) {
        info!("[dry-run] {:?}", action);
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }
}

#[async_trait::async_trait]
impl DesktopDriver for HeadlessDesktop {
    async fn move_to(&self, point: Point) -> Result<(), PlatformError> {
        self.record(DesktopAction::MoveTo { point });
        Ok(())
    }

    async fn move_by(&self, dx: i64, dy: i64) -> Result<(), PlatformError> {
        self.record(DesktopAction::MoveBy { dx, dy });
        Ok(())
    }

    async fn click(&self, point: Point, kind: ClickKind) -> Result<(), PlatformError> {
        self.record(DesktopAction::Click {
            point,
            kind: kind.to_string(),
        });
        Ok(())
    }

    async fn drag_to(&self, from: Point, to: Point) -> Result<(), PlatformError> {
        self.record(DesktopAction::DragTo { from, to });
        Ok(())
    }

    async fn scroll(&self, units: i64) -> Result<(), PlatformError> {
        self.record(DesktopAction::Scroll { units });
        Ok(())
    }

    async fn hotkey(&self, keys: &[String]) -> Result<(), PlatformError> {
        self.record(DesktopAction::Hotkey {
            keys: keys.to_vec(),
        });
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<(), PlatformError> {
        self.record(DesktopAction::Press {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn type_text(&self, text: &str, interval: Duration) -> Result<(), PlatformError> {
        self.record(DesktopAction::TypeText {
            text: text.to_string(),
            interval_ms: interval.as_millis() as u64,
        });
        Ok(())
    }

    async fn top_window_rect(&self) -> Result<WindowRect, PlatformError> {
        Ok(self.window)
    }

    async fn list_windows(&self) -> Result<Vec<WindowInfo>, PlatformError> {
        Ok(self.windows.clone())
    }

    async fn bring_to_front(&self, title: &str) -> Result<(), PlatformError> {
        if !self.windows.iter().any(|w| w.title == title) {
            return Err(PlatformError::InvalidArgument(format!(
                "no window titled '{title}'"
            )));
        }
        self.record(DesktopAction::BringToFront {
            title: title.to_string(),
        });
        Ok(())
    }

    async fn capture_screen(&self, path: &Path) -> Result<(), PlatformError> {
        self.record(DesktopAction::CaptureScreen {
            path: path.display().to_string(),
        });
        Ok(())
    }

    async fn save_page(&self, path: &Path) -> Result<(), PlatformError> {
        self.record(DesktopAction::SavePage {
            path: path.display().to_string(),
        });
        Ok(())
    }

    async fn open_app(&self, link: &str, args: &[String]) -> Result<(), PlatformError> {
        self.record(DesktopAction::OpenApp {
            link: link.to_string(),
            args: args.to_vec(),
        });
        Ok(())
    }
}

/// Hands out queued screens in order, then `fallback` forever.
#[derive(Debug, Default)]
pub struct ScriptedScreen {
    queue: Mutex<VecDeque<Vec<ScreenRecord>>>,
    fallback: Vec<ScreenRecord>,
    reads: AtomicUsize,
}

impl ScriptedScreen {
    pub fn new<I>(screens: I) -> Self
    where
        I: IntoIterator<Item = Vec<ScreenRecord>>,
    {
        Self {
            queue: Mutex::new(screens.into_iter().collect()),
            fallback: Vec::new(),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn with_fallback(mut self, records: Vec<ScreenRecord>) -> Self {
        self.fallback = records;
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ScreenProvider for ScriptedScreen {
    async fn read_screen(&self, request: &ScreenRequest) -> Result<Vec<ScreenRecord>, PlatformError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let next = self
            .queue
            .lock()
            .map_err(|e| PlatformError::PlatformError(e.to_string()))?
            .pop_front();
        let records = next.unwrap_or_else(|| self.fallback.clone());
        info!(
            "[dry-run] screen read page='{}' section='{}' -> {} records",
            request.page,
            request.section,
            records.len()
        );
        Ok(records)
    }
}

/// Answers pings from a queue, then with `default`.
#[derive(Debug)]
pub struct ScriptedPing {
    queue: Mutex<VecDeque<Option<Duration>>>,
    default: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedPing {
    pub fn always(answer: Option<Duration>) -> Self {
        Self::new(Vec::new(), answer)
    }

    pub fn new(answers: Vec<Option<Duration>>, default: Option<Duration>) -> Self {
        Self {
            queue: Mutex::new(answers.into()),
            default,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Pinger for ScriptedPing {
    async fn ping(&self, site: &str) -> Option<Duration> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(self.default);
        info!("[dry-run] ping {} -> {:?}", site, answer);
        answer
    }
}

/// Returns the same structure for every page.
#[derive(Debug, Clone, Default)]
pub struct StaticScraper {
    pub result: Value,
}

impl StaticScraper {
    pub fn new(result: Value) -> Self {
        Self { result }
    }
}

#[async_trait::async_trait]
impl HtmlScraper for StaticScraper {
    async fn scrape(&self, page: &Path, template: &str) -> Result<Value, PlatformError> {
        info!("[dry-run] scrape {} with template '{}'", page.display(), template);
        Ok(self.result.clone())
    }
}

/// Stand-in for a site-specific step: logs it and binds its `result` name to null.
#[derive(Debug, Clone, Default)]
pub struct DryRunOp;

#[async_trait::async_trait]
impl ExternalOp for DryRunOp {
    async fn run(&self, step: &Value, symbols: &mut SymbolTable) -> Result<(), PlatformError> {
        let kind = step.get("type").and_then(|t| t.as_str()).unwrap_or("?");
        info!("[dry-run] external step '{}'", kind);
        if let Some(name) = step.get("result").and_then(|r| r.as_str()) {
            if !name.is_empty() {
                symbols.set(name, Value::Null);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_ping_drains_queue_then_defaults() {
        let ping = ScriptedPing::new(vec![None], Some(Duration::from_millis(5)));
        assert_eq!(ping.ping("a").await, None);
        assert_eq!(ping.ping("a").await, Some(Duration::from_millis(5)));
        assert_eq!(ping.calls(), 2);
    }

    #[tokio::test]
    async fn headless_desktop_records_actions() {
        let desktop = HeadlessDesktop::default();
        desktop.refresh_page().await.unwrap();
        desktop.click(Point::new(3, 4), ClickKind::Right).await.unwrap();
        let actions = desktop.actions();
        assert_eq!(
            actions[0],
            DesktopAction::Hotkey {
                keys: vec!["ctrl".into(), "f5".into()]
            }
        );
        assert!(matches!(actions[1], DesktopAction::Click { .. }));
    }

    #[tokio::test]
    async fn only_listed_windows_can_be_raised() {
        let rect = WindowRect {
            x: 10,
            y: 20,
            width: 300,
            height: 200,
        };
        let desktop = HeadlessDesktop::default().with_windows(vec![WindowInfo::new("Mail", rect)]);
        assert_eq!(desktop.top_window_rect().await.unwrap(), rect);
        assert!(desktop.bring_to_front("Mail").await.is_ok());
        assert!(matches!(
            desktop.bring_to_front("Chat").await,
            Err(PlatformError::InvalidArgument(_))
        ));
        assert_eq!(desktop.actions().len(), 1);
    }
}
