//! ekman - apply a grid operation to a JSON grid document
//!
//! Reads a serialized field, applies the named operation and prints a JSON
//! summary of the result on stdout.

use anyhow::{bail, Context};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};

use ekman::algebra::{average_over_time, sum_over_time};
use ekman::config::Args;
use ekman::derived::{divergence, relative_vorticity, wind_speed, EarthModel};
use ekman::resample::{field_min_max, slice_at_level, subset};
use ekman::{
    generate_request_id, init_tracing, log_error, log_field_stats, log_operation_end,
    log_operation_start, log_timed_operation, Config, EkmanError, GridField, Unit,
};

/// What the binary prints for a produced field
#[derive(Debug, Serialize)]
struct FieldSummary {
    operation: String,
    params: Vec<String>,
    units: Vec<String>,
    domain: Option<String>,
    steps: usize,
    present_steps: usize,
    min: f32,
    max: f32,
}

impl FieldSummary {
    fn of(operation: &str, field: &GridField) -> Self {
        let params = field.params().unwrap_or_default();
        let (min, max) = field_min_max(field);
        Self {
            operation: operation.to_string(),
            params: params.iter().map(|p| p.name.clone()).collect(),
            units: params.iter().map(|p| p.unit.to_string()).collect(),
            domain: field.spatial_domain().map(|d| d.describe()),
            steps: field.step_count(),
            present_steps: field.flats().len(),
            min,
            max,
        }
    }
}

fn read_field(path: &Path) -> anyhow::Result<GridField> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading grid document {}", path.display()))?;
    let field: GridField = serde_json::from_str(&content)
        .with_context(|| format!("parsing grid document {}", path.display()))?;
    field.validate().context("validating grid document")?;
    Ok(field)
}

fn second_field(args: &Args) -> anyhow::Result<GridField> {
    match &args.second {
        Some(path) => read_field(path),
        None => bail!("operation '{}' needs --second", args.operation),
    }
}

fn apply(args: &Args, config: &Config, earth: &EarthModel, field: &GridField) -> anyhow::Result<GridField> {
    let result = match args.operation.as_str() {
        "summary" => field.clone(),
        "subset" => {
            let manifold = field
                .spatial_domain()
                .map(|d| d.manifold_dimension())
                .unwrap_or(2);
            let (sx, sy, sz) = args.subset_strides(manifold);
            subset(field, sx, sy, sz)?
        }
        "average_over_time" => average_over_time(field, false)?,
        "sum_over_time" => sum_over_time(field, false)?,
        "wind_speed" => wind_speed(field, &second_field(args)?)?,
        "relative_vorticity" => relative_vorticity(field, &second_field(args)?, earth)?,
        "divergence" => divergence(field, &second_field(args)?, earth)?,
        "slice_level" => {
            let level = args
                .level
                .context("operation 'slice_level' needs --level")?;
            slice_at_level(field, level, &Unit::Hectopascal, config.engine.sampling_mode)?
        }
        other => bail!("unknown operation '{}'", other),
    };
    Ok(result)
}

fn main() -> anyhow::Result<()> {
    let (config, args) = Config::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    init_tracing(&config.log_level);
    let run_id = generate_request_id();
    info!(run_id = %run_id, "Starting ekman v{}", env!("CARGO_PKG_VERSION"));

    let earth = config.earth_model();
    let field = log_timed_operation("read_grid_document", || read_field(&args.input))?;

    let start = Instant::now();
    log_operation_start(&args.operation, args.input.to_str());
    let result = apply(&args, &config, &earth, &field);
    log_operation_end(&args.operation, start, result.is_ok());

    let result = result.map_err(|e| {
        match e.downcast_ref::<EkmanError>() {
            Some(err) => log_error(err, &args.operation),
            None => error!(operation = %args.operation, run_id = %run_id, "{:#}", e),
        }
        e
    })?;
    log_field_stats(&args.operation, &result);

    let summary = FieldSummary::of(&args.operation, &result);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
