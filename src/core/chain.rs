use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{DetectError, DetectResult};

/// Monotonic per-process run counter, keeps same-millisecond runs distinct
static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cooperative cancellation flag, checked between pipeline stages and inside
/// the external-engine poll loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Pipeline lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Delete intermediate artifacts when the run finishes
    pub cleanup_intermediates: bool,
    /// Delete intermediates produced so far when a stage fails
    pub cleanup_on_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cleanup_intermediates: true,
            cleanup_on_failure: false,
        }
    }
}

/// One tracked artifact reference
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub stage: String,
    /// Disposable at cleanup time unless retained
    pub intermediate: bool,
}

/// Per-run chain state: the sequence of artifact references produced so far.
///
/// Each run gets its own artifact namespace directory, so concurrent runs
/// sharing an output root never clobber each other's intermediates.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    namespace: PathBuf,
    artifacts: Vec<Artifact>,
    current: Option<PathBuf>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Create a run with a fresh artifact namespace under `output_root`.
    pub fn new(
        output_root: &Path,
        product_id: &str,
        config: PipelineConfig,
    ) -> DetectResult<Self> {
        let run_id = format!(
            "{}_{}_{}-{}",
            product_id,
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            std::process::id(),
            RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let namespace = output_root.join(run_id);
        std::fs::create_dir_all(&namespace)?;
        log::info!("pipeline namespace: {}", namespace.display());
        Ok(Self {
            config,
            namespace,
            artifacts: Vec::new(),
            current: None,
            cancel: CancelToken::new(),
        })
    }

    pub fn namespace(&self) -> &Path {
        &self.namespace
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Artifacts registered so far, oldest first
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Register the input product the chain starts from. The seed is never
    /// deleted by cleanup — the pipeline does not own it.
    pub fn seed(&mut self, input: &Path) {
        self.artifacts.push(Artifact {
            path: input.to_path_buf(),
            stage: "input".to_string(),
            intermediate: false,
        });
        self.current = Some(input.to_path_buf());
    }

    /// Run one stage against the current artifact.
    ///
    /// The closure receives (current artifact, namespace directory) and
    /// returns the path of the artifact it produced, which becomes the new
    /// chain head. On failure the chain halts; intermediates produced so far
    /// are removed when `cleanup_on_failure` is set, and the error surfaces
    /// the stage name and parameters with the cause attached.
    pub fn apply<F>(&mut self, stage: &str, params_desc: &str, op: F) -> DetectResult<PathBuf>
    where
        F: FnOnce(&Path, &Path) -> DetectResult<PathBuf>,
    {
        if self.cancel.is_cancelled() {
            return Err(DetectError::Processing(format!(
                "pipeline cancelled before stage '{}'",
                stage
            )));
        }

        let input = self.current.clone().ok_or_else(|| {
            DetectError::Precondition("pipeline has no input artifact; call seed() first".to_string())
        })?;

        log::info!("stage '{}' [{}] on {}", stage, params_desc, input.display());
        match op(&input, &self.namespace) {
            Ok(output) => {
                self.artifacts.push(Artifact {
                    path: output.clone(),
                    stage: stage.to_string(),
                    intermediate: true,
                });
                self.current = Some(output.clone());
                Ok(output)
            }
            Err(source) => {
                log::error!("stage '{}' failed: {}", stage, source);
                if self.config.cleanup_on_failure {
                    let removed = self.dispose_intermediates(&[]);
                    log::info!("removed {} intermediates after failure", removed);
                }
                Err(DetectError::Stage {
                    stage: stage.to_string(),
                    parameters: params_desc.to_string(),
                    source: Box::new(source),
                })
            }
        }
    }

    /// Head of the chain, if any stage has run or a seed is set
    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Dispose every tracked intermediate artifact not in the retain set.
    /// Returns the number of artifacts removed from disk.
    pub fn cleanup(&mut self, keep: &[&Path]) -> usize {
        let removed = self.dispose_intermediates(keep);
        log::info!("cleanup removed {} intermediate artifacts", removed);
        removed
    }

    /// Finish the run: when configured, dispose every intermediate except the
    /// chain head, then hand the head back to the caller.
    pub fn finish(mut self) -> DetectResult<PathBuf> {
        let terminal = self.current.clone().ok_or_else(|| {
            DetectError::Precondition("pipeline finished without producing an artifact".to_string())
        })?;
        if self.config.cleanup_intermediates {
            let keep = [terminal.as_path()];
            let removed = self.dispose_intermediates(&keep);
            log::info!(
                "pipeline finished at {}; removed {} intermediates",
                terminal.display(),
                removed
            );
        }
        Ok(terminal)
    }

    fn dispose_intermediates(&mut self, keep: &[&Path]) -> usize {
        let mut removed = 0usize;
        self.artifacts.retain(|artifact| {
            let retain = !artifact.intermediate || keep.contains(&artifact.path.as_path());
            if !retain {
                if remove_artifact(&artifact.path) {
                    removed += 1;
                } else {
                    log::warn!("could not remove intermediate {}", artifact.path.display());
                }
            }
            retain
        });
        removed
    }
}

/// Remove an artifact file or directory plus a BEAM-DIMAP .data sidecar.
fn remove_artifact(path: &Path) -> bool {
    let ok = if path.is_dir() {
        std::fs::remove_dir_all(path).is_ok()
    } else {
        std::fs::remove_file(path).is_ok()
    };
    let sidecar = path.with_extension("data");
    if sidecar.is_dir() {
        let _ = std::fs::remove_dir_all(&sidecar);
    }
    ok
}

/// Extract the product identifier from a chained artifact name such as
/// `S1A_IW_SLC__1SDV_..._670F_TC.dim` (the stem minus the stage suffix).
pub fn extract_product_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let re = regex::Regex::new(r"^(.+?)_[^_]+\.(dim|tif|h5)$").ok()?;
    re.captures(name)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, b"artifact").unwrap();
    }

    #[test]
    fn test_chain_threads_artifacts_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("input.dim");
        touch(&input);

        let mut pipeline =
            Pipeline::new(root.path(), "S1A_TEST", PipelineConfig::default()).unwrap();
        pipeline.seed(&input);

        let first = pipeline
            .apply("calibrate", "sigma0", |_, ns| {
                let out = ns.join("cal.dim");
                touch(&out);
                Ok(out)
            })
            .unwrap();
        let second = pipeline
            .apply("multilook", "4x1", |prev, ns| {
                assert!(prev.ends_with("cal.dim"));
                let out = ns.join("ml.dim");
                touch(&out);
                Ok(out)
            })
            .unwrap();

        assert_eq!(pipeline.artifacts().len(), 3);
        let terminal = pipeline.finish().unwrap();
        assert_eq!(terminal, second);
        // Intermediate is gone, terminal and seed survive
        assert!(!first.exists());
        assert!(terminal.exists());
        assert!(input.exists());
    }

    #[test]
    fn test_explicit_cleanup_honors_retain_set() {
        let root = tempfile::tempdir().unwrap();
        let mut pipeline =
            Pipeline::new(root.path(), "S1A_TEST", PipelineConfig::default()).unwrap();
        let input = root.path().join("input.dim");
        touch(&input);
        pipeline.seed(&input);

        let a = pipeline
            .apply("a", "", |_, ns| {
                let out = ns.join("a.dim");
                touch(&out);
                Ok(out)
            })
            .unwrap();
        let b = pipeline
            .apply("b", "", |_, ns| {
                let out = ns.join("b.dim");
                touch(&out);
                Ok(out)
            })
            .unwrap();

        let removed = pipeline.cleanup(&[b.as_path()]);
        assert_eq!(removed, 1);
        assert!(!a.exists());
        assert!(b.exists());
    }

    #[test]
    fn test_stage_failure_surfaces_name_and_parameters() {
        let root = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            cleanup_on_failure: true,
            ..PipelineConfig::default()
        };
        let mut pipeline = Pipeline::new(root.path(), "S1A_TEST", config).unwrap();
        let input = root.path().join("input.dim");
        touch(&input);
        pipeline.seed(&input);

        let produced = pipeline
            .apply("a", "", |_, ns| {
                let out = ns.join("a.dim");
                touch(&out);
                Ok(out)
            })
            .unwrap();

        let err = pipeline
            .apply("terrain-correction", "spacing=10m", |_, _| {
                Err(DetectError::Processing("engine exploded".to_string()))
            })
            .unwrap_err();

        match err {
            DetectError::Stage {
                stage, parameters, ..
            } => {
                assert_eq!(stage, "terrain-correction");
                assert_eq!(parameters, "spacing=10m");
            }
            other => panic!("expected Stage error, got {}", other),
        }
        // cleanup_on_failure removed the earlier intermediate
        assert!(!produced.exists());
        assert!(input.exists());
    }

    #[test]
    fn test_cancellation_stops_before_next_stage() {
        let root = tempfile::tempdir().unwrap();
        let mut pipeline =
            Pipeline::new(root.path(), "S1A_TEST", PipelineConfig::default()).unwrap();
        let input = root.path().join("input.dim");
        touch(&input);
        pipeline.seed(&input);

        pipeline.cancel_token().cancel();
        let err = pipeline
            .apply("never-runs", "", |_, ns| Ok(ns.join("x.dim")))
            .unwrap_err();
        assert!(err.to_string().contains("cancelled before stage 'never-runs'"));
    }

    #[test]
    fn test_apply_without_seed_is_precondition() {
        let root = tempfile::tempdir().unwrap();
        let mut pipeline =
            Pipeline::new(root.path(), "S1A_TEST", PipelineConfig::default()).unwrap();
        let err = pipeline
            .apply("a", "", |_, ns| Ok(ns.join("a.dim")))
            .unwrap_err();
        assert!(matches!(err, DetectError::Precondition(_)));
    }

    #[test]
    fn test_distinct_namespaces_per_run() {
        let root = tempfile::tempdir().unwrap();
        let a = Pipeline::new(root.path(), "S1A_TEST", PipelineConfig::default()).unwrap();
        let b = Pipeline::new(root.path(), "S1A_TEST", PipelineConfig::default()).unwrap();
        assert_ne!(a.namespace(), b.namespace());
    }

    #[test]
    fn test_extract_product_id() {
        let id = extract_product_id(Path::new(
            "/data/S1A_IW_SLC__1SDV_20240503T031928_670F_TC.dim",
        ));
        assert_eq!(
            id.as_deref(),
            Some("S1A_IW_SLC__1SDV_20240503T031928_670F")
        );
        assert_eq!(extract_product_id(Path::new("noext")), None);
    }
}
