//! `billflow status` — per-item stage flags and what the next run would do.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use billflow_core::{ItemId, ItemRecord, SessionScope, Stage, StateStore};
use billflow_pipeline::gate::{self, GateDecision};

use super::ScopeArgs;

/// Arguments for `billflow status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let config = self.scope.load_config()?;
        let scope = self.scope.scope();
        let store = StateStore::open(config.state_path(scope))
            .with_context(|| format!("failed to load state for {scope}"))?;

        let rows: Vec<ItemStatus> = store
            .items()
            .iter()
            .map(|(id, record)| ItemStatus::new(id, record))
            .collect();
        if self.json {
            return print_json(scope, rows);
        }
        print_table(scope, rows);
        Ok(())
    }
}

/// The next thing a run would do for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Complete,
    Run(Stage),
    SkipUnchanged(Stage),
}

#[derive(Debug, Clone)]
struct ItemStatus {
    item: String,
    pending: Vec<Stage>,
    next: Next,
    amended_status: String,
    last_updated: String,
}

impl ItemStatus {
    fn new(id: &ItemId, record: &ItemRecord) -> Self {
        let next = gate::plan(record)
            .into_iter()
            .find_map(|(stage, decision)| match decision {
                GateDecision::NotNeeded => None,
                GateDecision::Unchanged { .. } => Some(Next::SkipUnchanged(stage)),
                GateDecision::Run { .. } => Some(Next::Run(stage)),
            })
            .unwrap_or(Next::Complete);
        Self {
            item: id.0.clone(),
            pending: record.pending_stages(),
            next,
            amended_status: record.amended_status.to_string(),
            last_updated: record.last_updated.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

#[derive(Serialize)]
struct StatusJson {
    summary: SummaryJson,
    items: Vec<ItemJson>,
}

#[derive(Serialize)]
struct SummaryJson {
    scope: String,
    items: usize,
    pending: usize,
}

#[derive(Serialize)]
struct ItemJson {
    item: String,
    pending: Vec<Stage>,
    next: Option<NextJson>,
    amended_status: String,
    last_updated: String,
}

#[derive(Serialize)]
struct NextJson {
    stage: Stage,
    action: &'static str,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "item")]
    item: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "pending")]
    pending: String,
    #[tabled(rename = "amended")]
    amended: String,
    #[tabled(rename = "last updated (UTC)")]
    last_updated: String,
}

fn print_json(scope: SessionScope, rows: Vec<ItemStatus>) -> Result<()> {
    let payload = StatusJson {
        summary: SummaryJson {
            scope: scope.to_string(),
            items: rows.len(),
            pending: rows.iter().filter(|r| r.next != Next::Complete).count(),
        },
        items: rows
            .into_iter()
            .map(|row| ItemJson {
                item: row.item,
                pending: row.pending,
                next: match row.next {
                    Next::Complete => None,
                    Next::Run(stage) => Some(NextJson { stage, action: "run" }),
                    Next::SkipUnchanged(stage) => Some(NextJson {
                        stage,
                        action: "skip_unchanged",
                    }),
                },
                amended_status: row.amended_status,
                last_updated: row.last_updated,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(scope: SessionScope, rows: Vec<ItemStatus>) {
    let pending = rows.iter().filter(|r| r.next != Next::Complete).count();
    println!(
        "billflow v{} | {scope} | {} items | {pending} pending",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
    );
    if rows.is_empty() {
        println!("No items tracked. Run `billflow run` first.");
        return;
    }

    println!(
        "Indicators: {} COMPLETE  {} RUN  {} UNCHANGED",
        indicator(Next::Complete),
        indicator(Next::Run(Stage::Download)),
        indicator(Next::SkipUnchanged(Stage::Amend)),
    );
    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            status: format!("{} {}", indicator(row.next), label(row.next)),
            pending: row
                .pending
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(", "),
            item: row.item,
            amended: row.amended_status,
            last_updated: row.last_updated,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if pending > 0 {
        println!("Run 'billflow run --year {}' to process pending items.", scope.year);
    }
}

fn label(next: Next) -> String {
    match next {
        Next::Complete => "complete".to_string(),
        Next::Run(stage) => format!("{stage} next"),
        Next::SkipUnchanged(stage) => format!("{stage} unchanged"),
    }
}

fn indicator(next: Next) -> String {
    match next {
        Next::Complete => "■".green().bold().to_string(),
        Next::Run(_) => "■".yellow().bold().to_string(),
        Next::SkipUnchanged(_) => "■".bright_black().bold().to_string(),
    }
}
