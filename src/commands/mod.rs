//! Stage command handlers.
//!
//! Each handler takes the validated [`PipelineState`] and runs one stage. The
//! `*Args` types carry the command-line overrides applied to the
//! configuration before it is validated.

pub mod analyse;
pub mod convert;
pub mod fetch;
pub mod listing;

pub use analyse::{analyse, AnalyseArgs};
pub use convert::{convert, ConvertArgs};
pub use fetch::{fetch, FetchArgs};
pub use listing::{update_listing, ListingArgs};

use serde::Serialize;
use tracing::info;

use crate::analyse::AnalyseReport;
use crate::convert::ConvertReport;
use crate::error::AppError;
use crate::fetch::FetchReport;
use crate::state::PipelineState;

/// Reports of a full `run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub fetch: FetchReport,
    pub convert: ConvertReport,
    pub analyse: AnalyseReport,
}

/// Runs fetch, convert and analyse in order, each to completion.
pub async fn run_pipeline(state: &PipelineState) -> Result<RunReport, AppError> {
    info!(run_id = %state.failures.run_id(), "Starting full pipeline run");
    let fetch = fetch::fetch(state).await?;
    let convert = convert::convert(state).await?;
    let analyse = analyse::analyse(state).await?;
    Ok(RunReport {
        fetch,
        convert,
        analyse,
    })
}
