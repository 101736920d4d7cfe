use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::IndexArgs;
use crate::evidence::{EvidenceLoadRequest, load_or_build};
use crate::model::IndexBuildManifest;
use crate::semantic::resolve_model_config;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

use super::{build_manifest_path, local_embedder, snapshot_paths};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: IndexArgs) -> Result<()> {
    let started_ts = Utc::now();
    let run_id = format!("index-{}", utc_compact_string(started_ts));
    let model = resolve_model_config(&args.model_id);
    let snapshot = snapshot_paths(&args.cache_root);
    let manifest_path = build_manifest_path(&args.cache_root);

    info!(
        run_id = %run_id,
        db_path = %args.db_path.display(),
        model_id = %model.model_id,
        force = args.force,
        tables = args.tables.len(),
        "index build requested"
    );

    let request = EvidenceLoadRequest {
        db_path: args.db_path.clone(),
        snapshot: snapshot.clone(),
        tables: args.tables.clone(),
        force_rebuild: args.force,
    };
    let loaded = load_or_build(&request, local_embedder(&model.model_id))
        .with_context(|| format!("failed to build evidence index from {}", args.db_path.display()))?;

    for warning in &loaded.warnings {
        warn!(warning = %warning, "index build warning");
    }

    let manifest = IndexBuildManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        generated_at: now_utc_string(),
        db_path: args.db_path.display().to_string(),
        index_path: snapshot.index_path.display().to_string(),
        metadata_path: snapshot.metadata_path.display().to_string(),
        model_id: model.model_id.clone(),
        model_name: model.model_name.clone(),
        embedding_dim: model.dimensions,
        normalization: model.normalization.clone(),
        backend: model.backend.clone(),
        origin: loaded.origin.as_str().to_string(),
        tables: loaded.tables.clone(),
        indexed_rows: loaded.engine.index().len(),
        skipped_rows: loaded.engine.skipped_rows(),
        duration_ms: loaded.duration_ms,
        warnings: loaded.warnings.clone(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        origin = loaded.origin.as_str(),
        indexed_rows = manifest.indexed_rows,
        skipped_rows = manifest.skipped_rows,
        duration_ms = manifest.duration_ms,
        manifest_path = %manifest_path.display(),
        "index build completed"
    );
    Ok(())
}
