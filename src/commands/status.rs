//! Status command

use crate::error::Result;
use crate::host::Host;
use serde::Serialize;
use std::time::Duration;

/// Host status summary
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub snapshot_sha: String,
    pub live_assets: usize,
    pub tables: Vec<(String, i64)>,
    pub backend_ready: bool,
    pub qdrant_points: Option<u64>,
}

pub async fn cmd_status(host: &Host) -> Result<StatusReport> {
    let components = host.start_once().await?;

    let snapshot = components.catalog.snapshot().await?;
    let tables = components.catalog.table_row_counts().await?;

    let backend_ready = components
        .vectors
        .wait_ready(Duration::from_secs(2))
        .await
        .is_ok();
    let qdrant_points = if backend_ready {
        components.vectors.count_points().await.ok()
    } else {
        None
    };

    Ok(StatusReport {
        snapshot_sha: snapshot.sha,
        live_assets: snapshot.total,
        tables,
        backend_ready,
        qdrant_points,
    })
}

pub fn print_status(report: &StatusReport, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
        return;
    }

    println!("Catalog");
    for (table, count) in &report.tables {
        println!("  {table:<12} {count}");
    }
    println!("Live assets    {}", report.live_assets);
    if report.snapshot_sha.is_empty() {
        println!("Snapshot       (empty catalog)");
    } else {
        println!("Snapshot       {}", report.snapshot_sha);
    }
    match (report.backend_ready, report.qdrant_points) {
        (true, Some(points)) => println!("Vector backend ready, {points} points"),
        (true, None) => println!("Vector backend ready"),
        (false, _) => println!("Vector backend unreachable"),
    }
}
