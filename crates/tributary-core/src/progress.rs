//! Structured progress emission for supervising processes.
//!
//! Long sync and crawl passes report via stdout as prefixed JSON lines
//! (`TRIBUTARY_PROGRESS:` / `TRIBUTARY_RESULT:`) that a wrapping process
//! can parse to update UI state.

use std::io::Write;

use crate::crawler::CrawlReport;
use crate::fanout::SyncReport;

/// Emit a stage update, e.g. `("github", "syncing", "Syncing acme")`.
pub fn emit_stage(connector: &str, stage: &str, message: &str) {
    emit(&stage_line(connector, stage, message));
}

/// Emit the outcome of a sync pass.
pub fn emit_sync_result(connector_id: i64, report: &SyncReport) {
    emit(&sync_result_line(connector_id, report));
}

/// Emit the outcome of a crawl pass.
pub fn emit_crawl_result(connector_id: i64, report: &CrawlReport) {
    emit(&crawl_result_line(connector_id, report));
}

fn emit(line: &str) {
    println!("{line}");
    let _ = std::io::stdout().flush();
}

fn stage_line(connector: &str, stage: &str, message: &str) -> String {
    format!(
        "TRIBUTARY_PROGRESS:{}",
        serde_json::json!({
            "connector": connector,
            "stage": stage,
            "message": message,
        })
    )
}

fn sync_result_line(connector_id: i64, report: &SyncReport) -> String {
    format!(
        "TRIBUTARY_RESULT:{}",
        serde_json::json!({
            "type": "sync",
            "status": if report.succeeded() { "complete" } else { "partial" },
            "connector_id": connector_id,
            "repos_synced": report.repos_synced,
            "repos_failed": report.repos_failed,
            "items_synced": report.items_synced,
        })
    )
}

fn crawl_result_line(connector_id: i64, report: &CrawlReport) -> String {
    format!(
        "TRIBUTARY_RESULT:{}",
        serde_json::json!({
            "type": "crawl",
            "status": if report.upsert_errors == 0 { "complete" } else { "partial" },
            "connector_id": connector_id,
            "pages_visited": report.pages_visited,
            "pages_indexed": report.pages_indexed,
            "pages_skipped": report.pages_skipped,
            "fetch_errors": report.fetch_errors,
        })
    )
}
