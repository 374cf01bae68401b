//! Rollback points, exception bookkeeping and reconnect-with-back-off.

use crate::platforms::Pinger;
use crate::steps::ExceptionHandlerArgs;
use crate::symbols::{Snapshot, SymbolTable, IN_EXCEPTION};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

fn default_max_retries() -> u32 {
    3
}

fn default_min_back_off() -> u64 {
    3
}

fn default_max_back_off() -> u64 {
    10
}

fn default_reference_site() -> String {
    "example.com".to_string()
}

fn default_fault_names() -> Vec<String> {
    vec!["site_not_reached".to_string(), "bad_request".to_string()]
}

fn default_page_stack_capacity() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_back_off")]
    pub min_retry_back_off_secs: u64,
    #[serde(default = "default_max_back_off")]
    pub max_retry_back_off_secs: u64,
    #[serde(default = "default_reference_site")]
    pub reference_site: String,
    /// Anchor names whose presence on screen means the page failed to load.
    #[serde(default = "default_fault_names")]
    pub fault_names: Vec<String>,
    #[serde(default = "default_page_stack_capacity")]
    pub page_stack_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_retry_back_off_secs: default_min_back_off(),
            max_retry_back_off_secs: default_max_back_off(),
            reference_site: default_reference_site(),
            fault_names: default_fault_names(),
            page_stack_capacity: default_page_stack_capacity(),
        }
    }
}

impl RecoveryConfig {
    /// Retry settings for one handler, its own fields winning over the defaults.
    pub fn policy_for(&self, handler: Option<&ExceptionHandlerArgs>) -> RetryPolicy {
        let mut policy = RetryPolicy {
            max_retries: self.max_retries,
            min_back_off: Duration::from_secs(self.min_retry_back_off_secs),
            max_back_off: Duration::from_secs(self.max_retry_back_off_secs),
            site: self.reference_site.clone(),
        };
        if let Some(args) = handler {
            if let Some(n) = args.max_retries {
                policy.max_retries = n;
            }
            if let Some(s) = args.min_retry_back_off {
                policy.min_back_off = Duration::from_secs(s);
            }
            if let Some(s) = args.max_retry_back_off {
                policy.max_back_off = Duration::from_secs(s);
            }
            if let Some(site) = args.site.as_ref().filter(|s| !s.is_empty()) {
                policy.site = site.clone();
            }
        }
        policy
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_back_off: Duration,
    pub max_back_off: Duration,
    pub site: String,
}

impl RetryPolicy {
    /// Upper bound on the total time spent backing off.
    pub fn worst_case(&self) -> Duration {
        self.max_back_off.max(self.min_back_off) * self.max_retries
    }

    fn back_off(&self, rng: &mut StdRng) -> Duration {
        let lo = self.min_back_off.as_millis() as u64;
        let hi = self.max_back_off.as_millis() as u64;
        if hi <= lo {
            return self.min_back_off;
        }
        Duration::from_millis(rng.gen_range(lo..hi))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Reconnected { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Wait, ping, repeat until the site answers or the retry budget runs out.
pub async fn retry_until_reachable(
    ping: &dyn Pinger,
    rng: &mut StdRng,
    policy: &RetryPolicy,
) -> RetryOutcome {
    let mut attempts = 0;
    while attempts < policy.max_retries {
        attempts += 1;
        let wait = policy.back_off(rng);
        debug!(
            "Retry {}/{}: backing off {:?} before pinging {}",
            attempts, policy.max_retries, wait, policy.site
        );
        tokio::time::sleep(wait).await;
        if let Some(rtt) = ping.ping(&policy.site).await {
            info!("{} reachable again after {} attempt(s), rtt {:?}", policy.site, attempts, rtt);
            return RetryOutcome::Reconnected { attempts };
        }
    }
    warn!("{} still unreachable after {} attempt(s)", policy.site, attempts);
    RetryOutcome::Exhausted { attempts }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollbackFrame {
    /// Dispatcher index to resume from.
    pub address: usize,
    pub snapshot: Snapshot,
}

/// Bounded LIFO of rollback frames; the oldest frame is evicted when full.
#[derive(Debug, Clone)]
pub struct PageStack {
    frames: VecDeque<RollbackFrame>,
    capacity: usize,
}

impl PageStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, frame: RollbackFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<RollbackFrame> {
        self.frames.pop_back()
    }

    pub fn top(&self) -> Option<&RollbackFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionDescriptor {
    pub cause: String,
    pub data: Value,
    /// Index of the step that raised it.
    pub raised_at: usize,
}

#[derive(Debug)]
pub struct RecoveryLayer {
    pub config: RecoveryConfig,
    pages: PageStack,
    exceptions: Vec<ExceptionDescriptor>,
}

impl RecoveryLayer {
    pub fn new(config: RecoveryConfig) -> Self {
        let pages = PageStack::new(config.page_stack_capacity);
        Self {
            config,
            pages,
            exceptions: Vec::new(),
        }
    }

    pub fn pages(&self) -> &PageStack {
        &self.pages
    }

    pub fn exceptions(&self) -> &[ExceptionDescriptor] {
        &self.exceptions
    }

    /// Push a rollback point resuming at `address`.
    pub fn record(&mut self, address: usize, symbols: &SymbolTable) {
        let snapshot = symbols.snapshot();
        debug!(
            "Rollback point at {} ({} names, depth {})",
            address,
            snapshot.len(),
            self.pages.len() + 1
        );
        self.pages.push(RollbackFrame { address, snapshot });
    }

    pub fn raise(&mut self, cause: &str, data: Value, raised_at: usize, symbols: &mut SymbolTable) {
        warn!("Exception '{}' raised at {}", cause, raised_at);
        symbols.set_flag(IN_EXCEPTION, true);
        self.exceptions.push(ExceptionDescriptor {
            cause: cause.to_string(),
            data,
            raised_at,
        });
    }

    /// Pop the newest rollback point and restore the names it captured.
    pub fn roll_back(&mut self, symbols: &mut SymbolTable) -> Option<RollbackFrame> {
        let frame = self.pages.pop()?;
        symbols.restore(&frame.snapshot);
        info!("Rolled back to index {}", frame.address);
        Some(frame)
    }

    /// Close the innermost exception; `in_exception` clears once none remain.
    pub fn resolve(&mut self, symbols: &mut SymbolTable) -> Option<ExceptionDescriptor> {
        let closed = self.exceptions.pop();
        if self.exceptions.is_empty() {
            symbols.set_flag(IN_EXCEPTION, false);
        }
        closed
    }

    pub fn clear_exceptions(&mut self, symbols: &mut SymbolTable) {
        self.exceptions.clear();
        symbols.set_flag(IN_EXCEPTION, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let config: RecoveryConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, RecoveryConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.reference_site, "example.com");
        assert_eq!(config.page_stack_capacity, 3);
    }

    #[test]
    fn handler_fields_override_defaults() {
        let args = ExceptionHandlerArgs {
            max_retries: Some(5),
            site: Some("status.example.org".into()),
            ..Default::default()
        };
        let policy = RecoveryConfig::default().policy_for(Some(&args));
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.min_back_off, Duration::from_secs(3));
        assert_eq!(policy.site, "status.example.org");
        assert_eq!(policy.worst_case(), Duration::from_secs(50));
    }

    #[test]
    fn page_stack_evicts_oldest() {
        let mut table = SymbolTable::new();
        let mut layer = RecoveryLayer::new(RecoveryConfig::default());
        for i in 0..5 {
            table.declare("n", json!(i));
            layer.record(i, &table);
        }
        assert_eq!(layer.pages().len(), 3);
        assert_eq!(layer.pages().top().unwrap().address, 4);

        let addresses: Vec<usize> = std::iter::from_fn(|| layer.pages.pop())
            .map(|f| f.address)
            .collect();
        assert_eq!(addresses, vec![4, 3, 2]);
    }

    #[test]
    fn in_exception_clears_only_when_stack_is_empty() {
        let mut table = SymbolTable::new();
        let mut layer = RecoveryLayer::new(RecoveryConfig::default());
        layer.raise("outer", Value::Null, 1, &mut table);
        layer.raise("inner", Value::Null, 2, &mut table);

        assert_eq!(layer.resolve(&mut table).unwrap().cause, "inner");
        assert!(table.flag(IN_EXCEPTION));
        assert_eq!(layer.resolve(&mut table).unwrap().cause, "outer");
        assert!(!table.flag(IN_EXCEPTION));
    }

    #[test]
    fn snapshot_then_rollback_is_identity() {
        let mut table = SymbolTable::new();
        table.declare("cart", json!({"items": [1, 2]}));
        let mut layer = RecoveryLayer::new(RecoveryConfig::default());
        layer.record(8, &table);

        table.declare("cart", json!(null));
        let frame = layer.roll_back(&mut table).unwrap();
        assert_eq!(frame.address, 8);
        assert_eq!(table.get("cart"), Some(&json!({"items": [1, 2]})));
    }
}
