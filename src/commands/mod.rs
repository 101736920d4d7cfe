pub mod ask;
pub mod index;
pub mod search;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::evidence::SnapshotPaths;
use crate::semantic::{Embedder, LocalHashEmbedder, resolve_model_config};

const SNAPSHOT_BASE_NAME: &str = "evidence";
const BUILD_MANIFEST_NAME: &str = "evidence_index_build.json";

pub(crate) fn snapshot_paths(cache_root: &Path) -> SnapshotPaths {
    SnapshotPaths::from_base(&cache_root.join(SNAPSHOT_BASE_NAME))
}

pub(crate) fn build_manifest_path(cache_root: &Path) -> PathBuf {
    cache_root.join("manifests").join(BUILD_MANIFEST_NAME)
}

pub(crate) fn local_embedder(model_id: &str) -> Arc<dyn Embedder> {
    Arc::new(LocalHashEmbedder::new(resolve_model_config(model_id)))
}
