//! Postgres repositories

mod export_jobs;
mod partners;
mod terminals;
mod transactions;

pub use export_jobs::PgExportJobRepository;
pub use partners::PgPartnerRepository;
pub use terminals::PgTerminalRepository;
pub use transactions::PgTransactionRepository;

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern
pub(crate) fn like_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
