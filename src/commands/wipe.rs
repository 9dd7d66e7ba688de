//! Wipe command: quiesce writers and clear both stores

use crate::error::{Error, Result};
use crate::host::Host;
use crate::maintenance::WipeReport;

pub async fn cmd_wipe(host: &Host, confirmed: bool) -> Result<WipeReport> {
    if !confirmed {
        return Err(Error::Config(
            "Refusing to wipe without --yes".to_string(),
        ));
    }

    let components = host.start_once().await?;
    Ok(components.wipe().await)
}

pub fn print_wipe_report(report: &WipeReport, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
        return;
    }

    if report.success {
        println!("Wipe complete: {}", report.message);
    } else {
        println!("{}", report.message);
    }
}
