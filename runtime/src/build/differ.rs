//! Post-build validation of the finished filesystem state.
//!
//! Differs run concurrently on the blocking pool. The first failure wins:
//! remaining tasks are aborted and their results ignored. Differs only read
//! the views they are given.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::{Result, StrataError};
use tokio::task::JoinSet;

use crate::mount::WHITEOUT_PREFIX;

/// Relative location of the cluster descriptor inside a root filesystem.
pub const CLUSTERFILE_PATH: &str = "etc/Clusterfile";

/// A mounted view handed to differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountView {
    /// Merged filesystem
    pub target: PathBuf,
    /// Writes captured on top of the lowers
    pub upper: PathBuf,
}

impl MountView {
    pub fn new(target: impl Into<PathBuf>, upper: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            upper: upper.into(),
        }
    }
}

/// A read-only consistency check over the finished build.
pub trait Differ: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect `finished` (the build's own layers) against `rootfs` (the
    /// build-wide root filesystem view).
    fn process(&self, finished: &MountView, rootfs: &MountView) -> Result<()>;
}

/// Built-in differ set.
pub fn default_differs() -> Vec<Arc<dyn Differ>> {
    vec![Arc::new(MetadataDiffer), Arc::new(ShadowDiffer)]
}

/// Run all differs concurrently and return the first failure.
pub async fn run_differs(
    differs: &[Arc<dyn Differ>],
    finished: &MountView,
    rootfs: &MountView,
) -> Result<()> {
    let mut join_set = JoinSet::new();

    for differ in differs {
        let differ = differ.clone();
        let finished = finished.clone();
        let rootfs = rootfs.clone();

        join_set.spawn_blocking(move || {
            let name = differ.name();
            tracing::debug!(differ = name, "Running differ");
            differ
                .process(&finished, &rootfs)
                .map_err(|e| match e {
                    e @ StrataError::DiffValidationError { .. } => e,
                    other => StrataError::DiffValidationError {
                        differ: name.to_string(),
                        message: other.to_string(),
                    },
                })
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                join_set.abort_all();
                return Err(e);
            }
            Err(e) => {
                join_set.abort_all();
                return Err(StrataError::Other(format!("Differ task failed: {}", e)));
            }
        }
    }

    tracing::debug!(count = differs.len(), "All differs passed");
    Ok(())
}

/// Every visible cluster descriptor must be a YAML mapping.
pub struct MetadataDiffer;

impl MetadataDiffer {
    fn check(&self, root: &Path) -> Result<()> {
        let path = root.join(CLUSTERFILE_PATH);
        if !path.is_file() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&path)?;
        let value: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| self.invalid(&path, &e.to_string()))?;
        if !value.is_mapping() {
            return Err(self.invalid(&path, "not a mapping"));
        }
        Ok(())
    }

    fn invalid(&self, path: &Path, reason: &str) -> StrataError {
        StrataError::DiffValidationError {
            differ: self.name().to_string(),
            message: format!("{}: {}", path.display(), reason),
        }
    }
}

impl Differ for MetadataDiffer {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn process(&self, finished: &MountView, rootfs: &MountView) -> Result<()> {
        self.check(&finished.target)?;
        self.check(&rootfs.target)
    }
}

/// Runtime writes to the root filesystem must not silently replace files
/// the build's directives produced.
pub struct ShadowDiffer;

impl ShadowDiffer {
    fn walk(&self, upper: &Path, rel: &Path, finished: &Path) -> Result<()> {
        let dir = upper.join(rel);
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(WHITEOUT_PREFIX) {
                continue;
            }
            let rel_path = rel.join(&name);
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                self.walk(upper, &rel_path, finished)?;
            } else if file_type.is_file() {
                let built = finished.join(&rel_path);
                let built_is_file = std::fs::symlink_metadata(&built)
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if built_is_file && std::fs::read(&built)? != std::fs::read(entry.path())? {
                    return Err(StrataError::DiffValidationError {
                        differ: self.name().to_string(),
                        message: format!(
                            "rootfs write to {} shadows content built by a directive",
                            rel_path.display()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Differ for ShadowDiffer {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn process(&self, finished: &MountView, rootfs: &MountView) -> Result<()> {
        if !rootfs.upper.is_dir() {
            return Ok(());
        }
        self.walk(&rootfs.upper, Path::new(""), &finished.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Views {
        _tmp: TempDir,
        finished: MountView,
        rootfs: MountView,
    }

    fn views() -> Views {
        let tmp = TempDir::new().unwrap();
        let finished = MountView::new(tmp.path().join("f/target"), tmp.path().join("f/upper"));
        let rootfs = MountView::new(tmp.path().join("r/target"), tmp.path().join("r/upper"));
        for dir in [&finished.target, &finished.upper, &rootfs.target, &rootfs.upper] {
            fs::create_dir_all(dir).unwrap();
        }
        Views {
            _tmp: tmp,
            finished,
            rootfs,
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    struct Passing(Arc<AtomicUsize>);

    impl Differ for Passing {
        fn name(&self) -> &'static str {
            "passing"
        }
        fn process(&self, _: &MountView, _: &MountView) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Differ for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn process(&self, _: &MountView, _: &MountView) -> Result<()> {
            Err(StrataError::Other("drift detected".to_string()))
        }
    }

    struct Slow;

    impl Differ for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn process(&self, _: &MountView, _: &MountView) -> Result<()> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_passing() {
        let v = views();
        let count = Arc::new(AtomicUsize::new(0));
        let differs: Vec<Arc<dyn Differ>> = vec![
            Arc::new(Passing(count.clone())),
            Arc::new(Passing(count.clone())),
            Arc::new(Passing(count.clone())),
        ];
        run_differs(&differs, &v.finished, &v.rootfs).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_failure_wins() {
        let v = views();
        let differs: Vec<Arc<dyn Differ>> = vec![Arc::new(Slow), Arc::new(Failing), Arc::new(Slow)];
        let err = run_differs(&differs, &v.finished, &v.rootfs)
            .await
            .unwrap_err();
        match err {
            StrataError::DiffValidationError { differ, message } => {
                assert_eq!(differ, "failing");
                assert!(message.contains("drift detected"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_set_passes() {
        let v = views();
        run_differs(&[], &v.finished, &v.rootfs).await.unwrap();
    }

    #[test]
    fn test_metadata_accepts_mapping_and_absence() {
        let v = views();
        MetadataDiffer.process(&v.finished, &v.rootfs).unwrap();

        write(
            &v.rootfs.target.join(CLUSTERFILE_PATH),
            "apiVersion: v1\nspec:\n  image: base\n",
        );
        MetadataDiffer.process(&v.finished, &v.rootfs).unwrap();
    }

    #[test]
    fn test_metadata_rejects_non_mapping() {
        let v = views();
        write(&v.finished.target.join(CLUSTERFILE_PATH), "- just\n- a list\n");
        assert!(matches!(
            MetadataDiffer.process(&v.finished, &v.rootfs),
            Err(StrataError::DiffValidationError { .. })
        ));
    }

    #[test]
    fn test_shadow_allows_new_and_identical_files() {
        let v = views();
        write(&v.finished.target.join("etc/app.conf"), "port=80");
        write(&v.rootfs.upper.join("etc/app.conf"), "port=80");
        write(&v.rootfs.upper.join("var/run/state"), "running");
        ShadowDiffer.process(&v.finished, &v.rootfs).unwrap();
    }

    #[test]
    fn test_shadow_rejects_overwrite() {
        let v = views();
        write(&v.finished.target.join("etc/app.conf"), "port=80");
        write(&v.rootfs.upper.join("etc/app.conf"), "port=8080");
        let err = ShadowDiffer.process(&v.finished, &v.rootfs).unwrap_err();
        assert!(err.to_string().contains("etc/app.conf"));
    }

    #[test]
    fn test_shadow_ignores_whiteouts() {
        let v = views();
        write(&v.finished.target.join("etc/app.conf"), "port=80");
        write(&v.rootfs.upper.join("etc/.wh.app.conf"), "");
        ShadowDiffer.process(&v.finished, &v.rootfs).unwrap();
    }

    #[test]
    fn test_default_differs() {
        let names: Vec<_> = default_differs().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["metadata", "shadow"]);
    }
}
