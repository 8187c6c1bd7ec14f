use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use cascadeflow_core::{CascadeError, Result};

/// Single cost ledger row. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub tokens: u64,
    pub cost: f64,
    pub query_id: Option<String>,
    pub user_id: Option<String>,
    pub user_tier: Option<String>,
    pub metadata: Map<String, Value>,
}

impl CostEntry {
    fn to_value(&self) -> Value {
        json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "model": self.model,
            "provider": self.provider,
            "tokens": self.tokens,
            "cost": self.cost,
            "query_id": self.query_id,
            "user_id": self.user_id,
            "user_tier": self.user_tier,
            "metadata": self.metadata,
        })
    }

    fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CascadeError::InvalidRequest("cost entry must be an object".into()))?;
        let timestamp = obj
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let opt_str =
            |key: &str| obj.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());
        Ok(Self {
            timestamp,
            model: opt_str("model").unwrap_or_default(),
            provider: opt_str("provider").unwrap_or_default(),
            tokens: obj.get("tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            cost: obj.get("cost").and_then(|v| v.as_f64()).unwrap_or(0.0),
            query_id: opt_str("query_id"),
            user_id: opt_str("user_id"),
            user_tier: opt_str("user_tier"),
            metadata: obj
                .get("metadata")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// Per-tier spend limits in USD. `None` means no limit for that window.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetConfig {
    pub daily: Option<f64>,
    pub weekly: Option<f64>,
    pub monthly: Option<f64>,
    pub total: Option<f64>,
}

impl BudgetConfig {
    pub fn daily(limit: f64) -> Self {
        Self {
            daily: Some(limit),
            ..Default::default()
        }
    }

    fn limit_for(&self, window: BudgetWindow) -> Option<f64> {
        match window {
            BudgetWindow::Daily => self.daily,
            BudgetWindow::Weekly => self.weekly,
            BudgetWindow::Monthly => self.monthly,
            BudgetWindow::Total => self.total,
        }
    }
}

/// Budget accumulation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetWindow {
    Daily,
    Weekly,
    Monthly,
    Total,
}

impl BudgetWindow {
    pub const ALL: [BudgetWindow; 4] = [
        BudgetWindow::Daily,
        BudgetWindow::Weekly,
        BudgetWindow::Monthly,
        BudgetWindow::Total,
    ];

    /// Wall-clock boundary label for the window containing `now`. Two
    /// instants share a window iff their labels are equal.
    fn boundary(&self, now: DateTime<Utc>) -> String {
        match self {
            BudgetWindow::Daily => now.date_naive().to_string(),
            BudgetWindow::Weekly => {
                let week = now.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            BudgetWindow::Monthly => format!("{}-{:02}", now.year(), now.month()),
            BudgetWindow::Total => String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct BudgetState {
    current_cost: f64,
    window_start: String,
}

/// Snapshot handed to enforcement callbacks.
#[derive(Debug, Clone)]
pub struct EnforcementContext {
    pub user_id: String,
    pub user_tier: String,
    pub current_cost: f64,
    pub budget_limit: f64,
    pub budget_used_pct: f64,
    pub budget_exceeded: bool,
}

/// What an enforcement callback decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementAction {
    Allow,
    Warn,
    Degrade,
    Block,
}

/// How budget violations are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforcementMode {
    #[default]
    Off,
    Warn,
    Strict,
    Degrade,
}

pub type EnforcementCallback = Arc<dyn Fn(&EnforcementContext) -> EnforcementAction + Send + Sync>;

/// Built-in: hard block at 100% of any budget.
pub fn strict_enforcement(ctx: &EnforcementContext) -> EnforcementAction {
    if ctx.budget_used_pct >= 100.0 {
        EnforcementAction::Block
    } else {
        EnforcementAction::Allow
    }
}

/// Built-in: warn in the 80–99% band, degrade at 100%.
pub fn graceful_enforcement(ctx: &EnforcementContext) -> EnforcementAction {
    if ctx.budget_used_pct >= 100.0 {
        EnforcementAction::Degrade
    } else if ctx.budget_used_pct >= 80.0 {
        EnforcementAction::Warn
    } else {
        EnforcementAction::Allow
    }
}

/// Built-in: over-budget consequences depend on the tier.
pub fn tier_based_enforcement(ctx: &EnforcementContext) -> EnforcementAction {
    if !ctx.budget_exceeded {
        return EnforcementAction::Allow;
    }
    match ctx.user_tier.as_str() {
        "enterprise" => EnforcementAction::Warn,
        "pro" => EnforcementAction::Degrade,
        _ => EnforcementAction::Block,
    }
}

fn warn_only_enforcement(ctx: &EnforcementContext) -> EnforcementAction {
    if ctx.budget_used_pct >= 80.0 {
        EnforcementAction::Warn
    } else {
        EnforcementAction::Allow
    }
}

struct TrackerInner {
    total_cost: f64,
    by_model: BTreeMap<String, f64>,
    by_provider: BTreeMap<String, f64>,
    entries: Vec<CostEntry>,
    tier_budgets: HashMap<String, BudgetConfig>,
    states: HashMap<(String, BudgetWindow), BudgetState>,
    mode: EnforcementMode,
    callback: Option<EnforcementCallback>,
    max_entries: Option<usize>,
}

/// Process-wide cost tracker. Share via `Arc<CostTracker>`; all state sits
/// behind one mutex so exports see a consistent snapshot.
pub struct CostTracker {
    inner: Mutex<TrackerInner>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CostTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                total_cost: 0.0,
                by_model: BTreeMap::new(),
                by_provider: BTreeMap::new(),
                entries: Vec::new(),
                tier_budgets: HashMap::new(),
                states: HashMap::new(),
                mode: EnforcementMode::Off,
                callback: None,
                max_entries: None,
            }),
        }
    }

    /// Cap the ledger, dropping oldest entries past the limit. Aggregates are
    /// unaffected by eviction.
    pub fn with_max_entries(self, max_entries: usize) -> Self {
        self.inner.lock().max_entries = Some(max_entries);
        self
    }

    pub fn with_enforcement_mode(self, mode: EnforcementMode) -> Self {
        self.inner.lock().mode = mode;
        self
    }

    pub fn with_tier_budget(self, tier: impl Into<String>, budget: BudgetConfig) -> Self {
        self.inner.lock().tier_budgets.insert(tier.into(), budget);
        self
    }

    /// Register a custom enforcement callback, replacing the mode's built-in.
    pub fn set_enforcement_callback(&self, callback: EnforcementCallback) {
        self.inner.lock().callback = Some(callback);
    }

    pub fn set_enforcement_mode(&self, mode: EnforcementMode) {
        self.inner.lock().mode = mode;
    }

    /// Record an untenanted cost entry (no budget enforcement).
    pub fn add_cost(
        &self,
        model: &str,
        provider: &str,
        tokens: u64,
        cost: f64,
        query_id: Option<String>,
        metadata: Map<String, Value>,
    ) {
        let entry = CostEntry {
            timestamp: Utc::now(),
            model: model.to_string(),
            provider: provider.to_string(),
            tokens,
            cost,
            query_id,
            user_id: None,
            user_tier: None,
            metadata,
        };
        let mut inner = self.inner.lock();
        Self::record(&mut inner, entry);
    }

    /// Charge a tenant: run budget enforcement, then record on anything but a
    /// refusal. Returns the action the enforcement policy decided.
    pub fn charge(
        &self,
        user_id: &str,
        user_tier: &str,
        model: &str,
        provider: &str,
        tokens: u64,
        cost: f64,
        query_id: Option<String>,
        metadata: Map<String, Value>,
    ) -> EnforcementAction {
        self.charge_at(
            Utc::now(),
            user_id,
            user_tier,
            model,
            provider,
            tokens,
            cost,
            query_id,
            metadata,
        )
    }

    /// `charge` with an explicit clock, used by window-reset tests and
    /// backfills.
    #[allow(clippy::too_many_arguments)]
    pub fn charge_at(
        &self,
        now: DateTime<Utc>,
        user_id: &str,
        user_tier: &str,
        model: &str,
        provider: &str,
        tokens: u64,
        cost: f64,
        query_id: Option<String>,
        metadata: Map<String, Value>,
    ) -> EnforcementAction {
        let mut inner = self.inner.lock();

        let budget = inner.tier_budgets.get(user_tier).copied();
        if let Some(budget) = budget {
            Self::roll_windows(&mut inner, user_id, &budget, now);

            // Refuse before recording when the tenant is already at or past a
            // limit. The over-limit charge itself is never written.
            if inner.mode != EnforcementMode::Off {
                if let Some(ctx) = Self::binding_context(&inner, user_id, user_tier, &budget, 0.0) {
                    let pre_action = Self::run_enforcement(&inner, &ctx);
                    if pre_action == EnforcementAction::Block {
                        warn!(
                            user_id,
                            user_tier,
                            cost,
                            used = ctx.current_cost,
                            limit = ctx.budget_limit,
                            "charge refused, budget exhausted"
                        );
                        return EnforcementAction::Block;
                    }
                }
            }

            for window in BudgetWindow::ALL {
                if budget.limit_for(window).is_none() {
                    continue;
                }
                let key = (user_id.to_string(), window);
                let boundary = window.boundary(now);
                let state = inner.states.entry(key).or_insert_with(|| BudgetState {
                    current_cost: 0.0,
                    window_start: boundary.clone(),
                });
                state.current_cost += cost;
            }
        }

        let entry = CostEntry {
            timestamp: now,
            model: model.to_string(),
            provider: provider.to_string(),
            tokens,
            cost,
            query_id,
            user_id: Some(user_id.to_string()),
            user_tier: Some(user_tier.to_string()),
            metadata,
        };
        Self::record(&mut inner, entry);

        if inner.mode == EnforcementMode::Off {
            return EnforcementAction::Allow;
        }
        let budget = match budget {
            Some(b) => b,
            None => return EnforcementAction::Allow,
        };
        match Self::binding_context(&inner, user_id, user_tier, &budget, 0.0) {
            Some(ctx) => {
                let action = Self::run_enforcement(&inner, &ctx);
                if action == EnforcementAction::Warn {
                    warn!(
                        user_id,
                        used_pct = ctx.budget_used_pct,
                        "budget warning threshold reached"
                    );
                }
                action
            }
            None => EnforcementAction::Allow,
        }
    }

    /// True iff the projected spend stays strictly below every non-null limit
    /// of the tier's budget, in every window.
    pub fn can_afford(&self, user_id: &str, amount: f64, user_tier: &str) -> bool {
        self.can_afford_at(Utc::now(), user_id, amount, user_tier)
    }

    pub fn can_afford_at(
        &self,
        now: DateTime<Utc>,
        user_id: &str,
        amount: f64,
        user_tier: &str,
    ) -> bool {
        let mut inner = self.inner.lock();
        let budget = match inner.tier_budgets.get(user_tier).copied() {
            Some(b) => b,
            None => return true,
        };
        Self::roll_windows(&mut inner, user_id, &budget, now);

        for window in BudgetWindow::ALL {
            let limit = match budget.limit_for(window) {
                Some(l) => l,
                None => continue,
            };
            let current = inner
                .states
                .get(&(user_id.to_string(), window))
                .map(|s| s.current_cost)
                .unwrap_or(0.0);
            if current + amount >= limit {
                return false;
            }
        }
        true
    }

    fn roll_windows(
        inner: &mut TrackerInner,
        user_id: &str,
        budget: &BudgetConfig,
        now: DateTime<Utc>,
    ) {
        for window in BudgetWindow::ALL {
            if budget.limit_for(window).is_none() {
                continue;
            }
            let key = (user_id.to_string(), window);
            let boundary = window.boundary(now);
            if let Some(state) = inner.states.get_mut(&key) {
                if state.window_start != boundary {
                    state.current_cost = 0.0;
                    state.window_start = boundary;
                }
            }
        }
    }

    /// Context for the most binding window (highest used fraction).
    fn binding_context(
        inner: &TrackerInner,
        user_id: &str,
        user_tier: &str,
        budget: &BudgetConfig,
        extra: f64,
    ) -> Option<EnforcementContext> {
        let mut best: Option<EnforcementContext> = None;
        for window in BudgetWindow::ALL {
            let limit = match budget.limit_for(window) {
                Some(l) => l.max(f64::MIN_POSITIVE),
                None => continue,
            };
            let current = inner
                .states
                .get(&(user_id.to_string(), window))
                .map(|s| s.current_cost)
                .unwrap_or(0.0)
                + extra;
            let used_pct = (current / limit) * 100.0;
            let ctx = EnforcementContext {
                user_id: user_id.to_string(),
                user_tier: user_tier.to_string(),
                current_cost: current,
                budget_limit: limit,
                budget_used_pct: used_pct,
                budget_exceeded: current >= limit,
            };
            match &best {
                Some(b) if b.budget_used_pct >= used_pct => {}
                _ => best = Some(ctx),
            }
        }
        best
    }

    fn run_enforcement(inner: &TrackerInner, ctx: &EnforcementContext) -> EnforcementAction {
        if let Some(cb) = &inner.callback {
            return cb(ctx);
        }
        match inner.mode {
            EnforcementMode::Off => EnforcementAction::Allow,
            EnforcementMode::Warn => warn_only_enforcement(ctx),
            EnforcementMode::Strict => strict_enforcement(ctx),
            EnforcementMode::Degrade => graceful_enforcement(ctx),
        }
    }

    fn record(inner: &mut TrackerInner, entry: CostEntry) {
        inner.total_cost += entry.cost;
        *inner.by_model.entry(entry.model.clone()).or_insert(0.0) += entry.cost;
        *inner.by_provider.entry(entry.provider.clone()).or_insert(0.0) += entry.cost;
        inner.entries.push(entry);
        if let Some(max) = inner.max_entries {
            if inner.entries.len() > max {
                let overflow = inner.entries.len() - max;
                inner.entries.drain(0..overflow);
            }
        }
    }

    // ── Introspection ──────────────────────────────────────────

    pub fn total_cost(&self) -> f64 {
        self.inner.lock().total_cost
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn by_model(&self) -> BTreeMap<String, f64> {
        self.inner.lock().by_model.clone()
    }

    pub fn by_provider(&self) -> BTreeMap<String, f64> {
        self.inner.lock().by_provider.clone()
    }

    pub fn recent_entries(&self, n: usize) -> Vec<CostEntry> {
        let inner = self.inner.lock();
        let start = inner.entries.len().saturating_sub(n);
        inner.entries[start..].to_vec()
    }

    pub fn summary(&self) -> Value {
        let inner = self.inner.lock();
        json!({
            "total_cost": inner.total_cost,
            "total_entries": inner.entries.len(),
            "by_model": inner.by_model,
            "by_provider": inner.by_provider,
        })
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.total_cost = 0.0;
        inner.by_model.clear();
        inner.by_provider.clear();
        inner.entries.clear();
        inner.states.clear();
    }

    // ── Exports ────────────────────────────────────────────────

    /// JSON export, snapshot-consistent with in-memory state.
    pub fn export_json(&self) -> Value {
        let inner = self.inner.lock();
        json!({
            "metadata": {
                "total_cost": inner.total_cost,
                "total_entries": inner.entries.len(),
                "exported_at": Utc::now().to_rfc3339(),
            },
            "by_model": inner.by_model,
            "by_provider": inner.by_provider,
            "entries": inner.entries.iter().map(|e| e.to_value()).collect::<Vec<_>>(),
        })
    }

    /// Rebuild a tracker from an [`export_json`] document. Aggregates are
    /// replayed from the entry list.
    pub fn from_json_export(export: &Value) -> Result<Self> {
        let entries = export
            .get("entries")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CascadeError::InvalidRequest("export missing entries".into()))?;
        let tracker = Self::new();
        {
            let mut inner = tracker.inner.lock();
            for raw in entries {
                let entry = CostEntry::from_value(raw)?;
                Self::record(&mut inner, entry);
            }
        }
        Ok(tracker)
    }

    /// CSV export, one row per ledger entry.
    pub fn export_csv(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::from("timestamp,model,provider,tokens,cost,user_id,user_tier,query_id\n");
        for e in &inner.entries {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{}\n",
                e.timestamp.to_rfc3339(),
                e.model,
                e.provider,
                e.tokens,
                e.cost,
                e.user_id.as_deref().unwrap_or(""),
                e.user_tier.as_deref().unwrap_or(""),
                e.query_id.as_deref().unwrap_or(""),
            ));
        }
        out
    }

    /// SQLite export into a single `cost_entries` table.
    pub fn export_sqlite(&self, path: &Path) -> Result<()> {
        let inner = self.inner.lock();
        let mut conn = rusqlite::Connection::open(path)
            .map_err(|e| CascadeError::Config(format!("sqlite open failed: {e}")))?;
        let tx = conn
            .transaction()
            .map_err(|e| CascadeError::Config(format!("sqlite transaction failed: {e}")))?;
        tx.execute(
            "CREATE TABLE IF NOT EXISTS cost_entries (
                timestamp TEXT NOT NULL,
                model TEXT NOT NULL,
                provider TEXT NOT NULL,
                tokens INTEGER NOT NULL,
                cost REAL NOT NULL,
                user_id TEXT,
                user_tier TEXT,
                query_id TEXT,
                metadata TEXT
            )",
            [],
        )
        .map_err(|e| CascadeError::Config(format!("sqlite schema failed: {e}")))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO cost_entries
                     (timestamp, model, provider, tokens, cost, user_id, user_tier, query_id, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(|e| CascadeError::Config(format!("sqlite prepare failed: {e}")))?;
            for e in &inner.entries {
                stmt.execute(rusqlite::params![
                    e.timestamp.to_rfc3339(),
                    e.model,
                    e.provider,
                    e.tokens as i64,
                    e.cost,
                    e.user_id,
                    e.user_tier,
                    e.query_id,
                    Value::Object(e.metadata.clone()).to_string(),
                ])
                .map_err(|err| {
                    error!(error = %err, "sqlite insert failed");
                    CascadeError::Config(format!("sqlite insert failed: {err}"))
                })?;
            }
        }
        tx.commit()
            .map_err(|e| CascadeError::Config(format!("sqlite commit failed: {e}")))?;
        Ok(())
    }
}
