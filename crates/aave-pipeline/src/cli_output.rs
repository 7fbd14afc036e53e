//! Human-readable summaries written to stderr. Stdout carries only JSON.

use std::io::Write as _;

use crate::{
    pipeline::{PipelineAborted, PipelineOutput, StepOutcome, StepRecord},
    types::{AccountSnapshot, PriceQuote, TokenAmount},
};

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

fn describe(rec: &StepRecord) -> String {
    let detail = match &rec.outcome {
        StepOutcome::Tx(r) => format!(
            "tx {:#x} ({}, {} confirmation(s))",
            r.tx_hash,
            r.status.as_str(),
            r.confirmations
        ),
        StepOutcome::Snapshot(s) => format!(
            "collateral {} ETH, debt {} ETH, available {} ETH",
            TokenAmount::new(s.total_collateral, s.decimals).display(),
            TokenAmount::new(s.total_debt, s.decimals).display(),
            s.available().display()
        ),
        StepOutcome::Quote(q) => format!(
            "1 unit = {} ETH",
            TokenAmount::new(q.answer, q.decimals).display()
        ),
        StepOutcome::Borrowable { amount, per_native } => format!(
            "{} (at {} per ETH)",
            amount.display(),
            per_native.display()
        ),
    };
    format!("  [{}] {:<10} {detail}", rec.index, rec.step.as_str())
}

pub fn print_run_summary(network: &str, out: &PipelineOutput) {
    let mut lines = vec![format!("Pipeline run {} on {network}", out.run_id)];
    lines.extend(out.steps.iter().map(describe));
    lines.push(format!(
        "You can borrow {} of the borrow asset.",
        out.borrowable.display()
    ));
    stderr_writeln(&lines.join("\n"));
}

pub fn print_abort_summary(network: &str, aborted: &PipelineAborted) {
    let mut lines = vec![format!("Pipeline run {} on {network} aborted", aborted.run_id)];
    lines.extend(aborted.completed.iter().map(describe));
    lines.push(format!(
        "  [{}] {:<10} FAILED ({}): {}",
        aborted.failed_step.index(),
        aborted.failed_step.as_str(),
        aborted.error.code(),
        aborted.error
    ));
    match aborted.last_confirmed() {
        Some(step) => lines.push(format!("Last confirmed write: {}.", step.as_str())),
        None => lines.push("No write was confirmed.".to_owned()),
    }
    lines.push(format!(
        "Rerun with `--from {}` once the cause is fixed.",
        aborted.resume_from().as_str()
    ));
    stderr_writeln(&lines.join("\n"));
}

pub fn print_snapshot(snap: &AccountSnapshot, wrapped: &TokenAmount) {
    stderr_writeln(&format!(
        "Got {} WETH.\nYou have {} worth of ETH deposited.\nYou have {} worth of ETH borrowed.\nYou can borrow {} worth of ETH.",
        wrapped.display(),
        TokenAmount::new(snap.total_collateral, snap.decimals).display(),
        TokenAmount::new(snap.total_debt, snap.decimals).display(),
        snap.available().display()
    ));
}

pub fn print_quote(quote: &PriceQuote, per_native: &TokenAmount) {
    stderr_writeln(&format!(
        "The borrow asset price is {} ETH ({} per ETH).",
        TokenAmount::new(quote.answer, quote.decimals).display(),
        per_native.display()
    ));
}
