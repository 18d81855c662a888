use crate::commands::CommandContext;
use crate::formatter::{format_json, print_info};
use anyhow::Result;
use pagestore::summarize_journal;
use serde_json::json;

pub fn stats(ctx: &CommandContext) -> Result<()> {
    let stats = ctx.store.stats()?;
    println!("{}", format_json(&serde_json::to_value(&stats)?, &ctx.format)?);
    Ok(())
}

pub fn metrics(ctx: &CommandContext) -> Result<()> {
    let metrics = ctx.store.metrics();

    let metrics_json = json!({
        "values": {
            "stored": metrics.values_stored,
            "removed": metrics.values_removed,
            "read": metrics.values_read,
        },
        "transactions": {
            "committed": metrics.transactions_committed,
            "aborted": metrics.transactions_aborted,
            "active": metrics.active_transactions,
        },
        "cache": {
            "hits": metrics.cache_hits,
            "misses": metrics.cache_misses,
            "evictions": metrics.cache_evictions,
            "hit_rate": format!("{:.2}%", metrics.cache_hit_rate * 100.0),
        },
        "storage": {
            "pages_allocated": metrics.pages_allocated,
            "pages_freed": metrics.pages_freed,
            "overflow_pages_created": metrics.overflow_pages_created,
            "dirty_pages": metrics.dirty_pages,
            "corruption_warnings": metrics.corruption_warnings,
        },
        "journal": {
            "records": metrics.journal_records,
            "bytes_written": metrics.journal_bytes_written,
            "flushes": metrics.journal_flushes,
            "checkpoints": metrics.checkpoints,
        },
    });

    println!("{}", format_json(&metrics_json, &ctx.format)?);
    Ok(())
}

pub fn recover(ctx: &CommandContext) -> Result<()> {
    let report = ctx.store.recovery_report();
    if report.redone == 0 && report.undone == 0 {
        print_info("Journal was clean; nothing to recover");
    }
    println!("{}", format_json(&serde_json::to_value(report)?, &ctx.format)?);
    Ok(())
}

pub fn journal(ctx: &CommandContext) -> Result<()> {
    let records = ctx.store.journal_records()?;
    let mut counts: Vec<_> = summarize_journal(&records).into_iter().collect();
    counts.sort_unstable();

    let rows: Vec<_> = counts
        .into_iter()
        .map(|(txn, records)| json!({ "transaction": txn, "records": records }))
        .collect();
    if rows.is_empty() {
        print_info("Journal holds no records");
        return Ok(());
    }
    println!("{}", format_json(&json!(rows), &ctx.format)?);
    Ok(())
}
