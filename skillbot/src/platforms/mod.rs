//! Collaborators the interpreter consumes. Real desktops, OCR services and
//! network checks live outside this crate; `headless` provides scripted
//! stand-ins for dry runs and tests.

use crate::errors::PlatformError;
use crate::symbols::SymbolTable;
use crate::types::{ClickKind, Point, ScreenRecord, WindowInfo, WindowRect};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod headless;

pub use headless::{
    DesktopAction, DryRunOp, HeadlessDesktop, ScriptedPing, ScriptedScreen, StaticScraper,
};

/// What Extract Info asks the screen provider for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenRequest {
    /// Screenshot the provider should analyse, when one was captured.
    pub image: Option<PathBuf>,
    pub page: String,
    pub section: String,
    pub theme: String,
    pub page_data_info: String,
    pub win_title_kw: String,
    pub settings: Value,
    pub options: Value,
}

/// Reads the top-most window into screen records.
#[async_trait::async_trait]
pub trait ScreenProvider: Send + Sync {
    async fn read_screen(&self, request: &ScreenRequest) -> Result<Vec<ScreenRecord>, PlatformError>;
}

/// Reachability check; `None` means unreachable.
#[async_trait::async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, site: &str) -> Option<Duration>;
}

/// Turns a saved page into a domain-shaped structure.
#[async_trait::async_trait]
pub trait HtmlScraper: Send + Sync {
    async fn scrape(&self, page: &Path, template: &str) -> Result<Value, PlatformError>;
}

/// Pointer, keyboard and window control.
#[async_trait::async_trait]
pub trait DesktopDriver: Send + Sync {
    async fn move_to(&self, point: Point) -> Result<(), PlatformError>;

    /// Move the pointer relative to where it is.
    async fn move_by(&self, dx: i64, dy: i64) -> Result<(), PlatformError>;

    async fn click(&self, point: Point, kind: ClickKind) -> Result<(), PlatformError>;

    async fn drag_to(&self, from: Point, to: Point) -> Result<(), PlatformError>;

    /// Positive scrolls up, negative scrolls down.
    async fn scroll(&self, units: i64) -> Result<(), PlatformError>;

    async fn hotkey(&self, keys: &[String]) -> Result<(), PlatformError>;

    async fn press(&self, key: &str) -> Result<(), PlatformError>;

    async fn type_text(&self, text: &str, interval: Duration) -> Result<(), PlatformError>;

    async fn top_window_rect(&self) -> Result<WindowRect, PlatformError>;

    /// Visible windows, top-most first.
    async fn list_windows(&self) -> Result<Vec<WindowInfo>, PlatformError>;

    async fn bring_to_front(&self, title: &str) -> Result<(), PlatformError>;

    async fn capture_screen(&self, path: &Path) -> Result<(), PlatformError>;

    async fn save_page(&self, path: &Path) -> Result<(), PlatformError>;

    async fn open_app(&self, link: &str, args: &[String]) -> Result<(), PlatformError>;

    /// Hard-refresh the current browser page.
    async fn refresh_page(&self) -> Result<(), PlatformError> {
        self.hotkey(&["ctrl".to_string(), "f5".to_string()]).await
    }
}

/// Handler for a step type the interpreter does not know natively, such as
/// site-specific scraping or label printing.
#[async_trait::async_trait]
pub trait ExternalOp: Send + Sync {
    async fn run(&self, step: &Value, symbols: &mut SymbolTable) -> Result<(), PlatformError>;
}

/// Everything a run talks to outside the interpreter.
#[derive(Clone)]
pub struct Collaborators {
    pub screen: Arc<dyn ScreenProvider>,
    pub desktop: Arc<dyn DesktopDriver>,
    pub ping: Arc<dyn Pinger>,
    pub scraper: Arc<dyn HtmlScraper>,
    pub external: HashMap<String, Arc<dyn ExternalOp>>,
}

impl Collaborators {
    /// Scripted collaborators: every desktop action is logged, the screen is
    /// empty and the network is always up.
    pub fn headless() -> Self {
        Self {
            screen: Arc::new(ScriptedScreen::default()),
            desktop: Arc::new(HeadlessDesktop::default()),
            ping: Arc::new(ScriptedPing::always(Some(Duration::from_millis(20)))),
            scraper: Arc::new(StaticScraper::default()),
            external: HashMap::new(),
        }
    }

    pub fn with_screen(mut self, screen: Arc<dyn ScreenProvider>) -> Self {
        self.screen = screen;
        self
    }

    pub fn with_desktop(mut self, desktop: Arc<dyn DesktopDriver>) -> Self {
        self.desktop = desktop;
        self
    }

    pub fn with_ping(mut self, ping: Arc<dyn Pinger>) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn HtmlScraper>) -> Self {
        self.scraper = scraper;
        self
    }

    pub fn with_external(mut self, kind: &str, op: Arc<dyn ExternalOp>) -> Self {
        self.external.insert(kind.to_string(), op);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.external.keys().collect();
        kinds.sort();
        f.debug_struct("Collaborators")
            .field("external", &kinds)
            .finish_non_exhaustive()
    }
}
