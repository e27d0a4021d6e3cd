//! Sequential directive execution.

use std::path::Path;
use std::sync::Arc;

use strata_core::{BuildMode, BuildOptions, Digest, Result, StrataError};

use super::context::ExecContext;
use super::handlers::{copy_sources, run_shell, ROOTFS_ENV};
use crate::cache::{input_digest, CacheLayer, CacheStore, Prober, ShellScope};
use crate::image::{Instruction, Layer};
use crate::mount::{MountDriver, MountTarget};
use crate::store::LayerStore;

/// Runs new layers one after another on top of the resolved base.
pub struct Executor<'a> {
    pub layers: &'a LayerStore,
    pub cache: &'a CacheStore,
    pub driver: Arc<dyn MountDriver>,
    /// Parent for per-step mount and staging directories
    pub tmp_dir: &'a Path,
    pub options: &'a BuildOptions,
    /// Target of the build-wide rootfs mount, exported to RUN/CMD
    pub rootfs: &'a Path,
}

impl Executor<'_> {
    /// Assign a content id to every new layer that produces content.
    ///
    /// Returns the final context: its `base_layers` is the resolved stack
    /// and its `parent_chain` the chain id of that stack. Stops at the first
    /// failing step.
    pub fn execute(&self, new_layers: &mut [Layer], base_layers: Vec<Digest>) -> Result<ExecContext> {
        let mut ctx = ExecContext::new(base_layers, self.options.use_cache);
        let total = new_layers.len();

        for (index, layer) in new_layers.iter_mut().enumerate() {
            let step = index + 1;
            let kind = layer.kind.to_string();
            let value = layer.value.clone();
            let instruction = Instruction::parse(layer)?;

            if self.options.mode == BuildMode::Lite && matches!(instruction, Instruction::Cmd { .. }) {
                tracing::info!(step, total, kind = %kind, value = %value, "Skipping CMD in lite build");
                continue;
            }

            tracing::info!(step, total, kind = %kind, value = %value, "Executing directive");

            ctx = self
                .step(layer, &instruction, ctx, step)
                .map_err(|e| match e {
                    e @ (StrataError::ValidationError(_) | StrataError::DepthExceeded { .. }) => e,
                    other => StrataError::ExecutionError {
                        index: step,
                        kind,
                        value,
                        message: other.to_string(),
                    },
                })?;
        }

        tracing::info!(
            layers = ctx.base_layers.len(),
            chain = %ctx.parent_chain.as_ref().map(|c| c.to_string()).unwrap_or_default(),
            "Executed all directives"
        );
        Ok(ctx)
    }

    fn step(
        &self,
        layer: &mut Layer,
        instruction: &Instruction,
        ctx: ExecContext,
        step: usize,
    ) -> Result<ExecContext> {
        match instruction {
            Instruction::From { .. } => Err(StrataError::ValidationError(
                "FROM may only appear as the first directive".to_string(),
            )),
            Instruction::Env { key, value } => Ok(ctx.with_env(key.clone(), value.clone())),
            Instruction::Label { key, value } => Ok(ctx.with_label(key.clone(), value.clone())),
            Instruction::Workdir { path } => Ok(ctx.with_workdir(path)),
            Instruction::Copy { .. } | Instruction::Run { .. } | Instruction::Cmd { .. } => {
                self.materialize(layer, instruction, ctx, step)
            }
        }
    }

    /// Reuse a cached layer or execute the directive and register its diff.
    fn materialize(
        &self,
        layer: &mut Layer,
        instruction: &Instruction,
        ctx: ExecContext,
        step: usize,
    ) -> Result<ExecContext> {
        let prober = Prober::new(self.cache, self.layers);
        let cache_layer = if self.options.use_cache {
            let scope = ShellScope {
                env: &ctx.env,
                workdir: ctx.workdir.as_deref(),
            };
            let digest = input_digest(
                instruction,
                &layer.value,
                scope,
                &self.options.context_dir,
                self.tmp_dir,
            )?;
            Some(CacheLayer::new(layer, digest))
        } else {
            None
        };

        if let (true, Some(cl)) = (ctx.continue_cache, &cache_layer) {
            if let Some(id) = prober.probe(ctx.parent_chain.as_ref(), cl)? {
                tracing::info!(step, layer = %id, "Using cached layer");
                layer.assign_id(id.clone())?;
                return Ok(ctx.with_layer(id, true));
            }
            tracing::debug!(step, "Cache miss, executing remaining directives");
        }

        let id = self.apply(instruction, &ctx)?;
        if let Some(cl) = &cache_layer {
            prober.record(ctx.parent_chain.as_ref(), cl, &id)?;
        }
        layer.assign_id(id.clone())?;
        tracing::info!(step, layer = %id, "Built layer");
        Ok(ctx.with_layer(id, false))
    }

    /// Execute against a fresh mount of the current stack and register the diff.
    fn apply(&self, instruction: &Instruction, ctx: &ExecContext) -> Result<Digest> {
        let lowers = self.layers.layer_paths(&ctx.base_layers)?;
        let mut mount = MountTarget::new(self.driver.clone(), self.tmp_dir, &lowers)?;

        match instruction {
            Instruction::Copy { src, dst } => {
                copy_sources(&self.options.context_dir, src, mount.target(), dst)?
            }
            Instruction::Run { command } | Instruction::Cmd { command } => {
                let cwd = match ctx.workdir.as_deref() {
                    Some(dir) if !dir.is_empty() => mount.target().join(dir),
                    _ => mount.target().to_path_buf(),
                };
                let mut env = ctx.env.clone();
                env.insert(ROOTFS_ENV.to_string(), self.rootfs.display().to_string());
                run_shell(command, &cwd, &env)?;
            }
            other => {
                return Err(StrataError::Other(format!(
                    "{} produces no filesystem content",
                    other.kind()
                )))
            }
        }

        mount.unmount()?;
        let id = self.layers.register_layer(mount.upper())?;
        mount.cleanup()?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::LayerKind;
    use crate::mount::CopyDriver;
    use std::fs;
    use strata_core::StrataConfig;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        config: StrataConfig,
        layers: LayerStore,
        cache: CacheStore,
        options: BuildOptions,
        rootfs: TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let context = tmp.path().join("context");
        fs::create_dir_all(&context).unwrap();
        fs::write(context.join("a"), "content of a").unwrap();
        fs::write(context.join("b"), "content of b").unwrap();
        let config = StrataConfig::with_root(tmp.path().join("root"));
        Fixture {
            layers: LayerStore::new(&config).unwrap(),
            cache: CacheStore::new(&config).unwrap(),
            options: BuildOptions::new(context),
            rootfs: TempDir::new().unwrap(),
            config,
            _tmp: tmp,
        }
    }

    impl Fixture {
        fn run(&self, layers: &mut [Layer]) -> Result<ExecContext> {
            let tmp_dir = self.config.tmp_dir();
            let executor = Executor {
                layers: &self.layers,
                cache: &self.cache,
                driver: Arc::new(CopyDriver::new()),
                tmp_dir: &tmp_dir,
                options: &self.options,
                rootfs: self.rootfs.path(),
            };
            executor.execute(layers, Vec::new())
        }
    }

    fn layers(spec: &[(LayerKind, &str)]) -> Vec<Layer> {
        spec.iter().map(|(k, v)| Layer::new(*k, *v)).collect()
    }

    #[test]
    fn test_copy_and_run_get_ids() {
        let f = fixture();
        let mut new = layers(&[(LayerKind::Copy, "a ."), (LayerKind::Run, "echo hi > hi.txt")]);
        let ctx = f.run(&mut new).unwrap();

        assert!(new.iter().all(|l| l.id.is_some()));
        assert_eq!(ctx.base_layers.len(), 2);
        let copy_dir = f.layers.layer_path(new[0].id.as_ref().unwrap());
        assert_eq!(fs::read_to_string(copy_dir.join("a")).unwrap(), "content of a");
        let run_dir = f.layers.layer_path(new[1].id.as_ref().unwrap());
        assert!(run_dir.join("hi.txt").is_file());
        // RUN sees the COPY result but only captures its own writes
        assert!(!run_dir.join("a").exists());
    }

    #[test]
    fn test_declarative_directives_have_no_id() {
        let f = fixture();
        let mut new = layers(&[
            (LayerKind::Env, "NAME=strata"),
            (LayerKind::Workdir, "/opt"),
            (LayerKind::Label, "tier=base"),
            (LayerKind::Run, "echo $NAME > name"),
        ]);
        let ctx = f.run(&mut new).unwrap();

        assert!(new[..3].iter().all(|l| l.id.is_none()));
        assert_eq!(ctx.base_layers.len(), 1);
        assert_eq!(ctx.labels["tier"], "base");
        let run_dir = f.layers.layer_path(new[3].id.as_ref().unwrap());
        assert_eq!(fs::read_to_string(run_dir.join("opt/name")).unwrap(), "strata\n");
    }

    #[test]
    fn test_lite_skips_cmd() {
        let mut f = fixture();
        f.options.mode = BuildMode::Lite;
        let mut new = layers(&[(LayerKind::Cmd, "touch never"), (LayerKind::Copy, "a .")]);
        let ctx = f.run(&mut new).unwrap();

        assert!(new[0].id.is_none());
        assert_eq!(ctx.base_layers, vec![new[1].id.clone().unwrap()]);
    }

    #[test]
    fn test_cloud_runs_cmd() {
        let f = fixture();
        let mut new = layers(&[(LayerKind::Cmd, "touch ran")]);
        f.run(&mut new).unwrap();
        let dir = f.layers.layer_path(new[0].id.as_ref().unwrap());
        assert!(dir.join("ran").is_file());
    }

    #[test]
    fn test_rebuild_hits_cache() {
        let f = fixture();
        let spec = [(LayerKind::Copy, "a ."), (LayerKind::Run, "head -c 16 /dev/urandom > stamp")];
        let mut first = layers(&spec);
        let first_ctx = f.run(&mut first).unwrap();

        // RUN output differs between runs, so a hit must come from the cache
        let mut second = layers(&spec);
        let second_ctx = f.run(&mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(first_ctx.parent_chain, second_ctx.parent_chain);
        assert!(second_ctx.continue_cache);
    }

    #[test]
    fn test_cache_is_prefix_only() {
        let f = fixture();
        let spec = [
            (LayerKind::Run, "echo fixed > fixed"),
            (LayerKind::Run, "head -c 16 /dev/urandom > stamp"),
        ];
        let mut first = layers(&spec);
        f.run(&mut first).unwrap();

        // Step 1 misses but rebuilds to the same id, so step 2's record
        // would match; it must still be executed
        fs::remove_dir_all(f.layers.layer_path(first[0].id.as_ref().unwrap())).unwrap();
        let mut second = layers(&spec);
        let ctx = f.run(&mut second).unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_ne!(first[1].id, second[1].id);
        assert!(!ctx.continue_cache);
    }

    #[test]
    fn test_source_change_invalidates_downstream() {
        let f = fixture();
        let spec = [(LayerKind::Copy, "a ."), (LayerKind::Run, "echo fixed > fixed")];
        let mut first = layers(&spec);
        let first_ctx = f.run(&mut first).unwrap();

        fs::write(f.options.context_dir.join("a"), "changed").unwrap();
        let mut second = layers(&spec);
        let second_ctx = f.run(&mut second).unwrap();

        assert_ne!(first[0].id, second[0].id);
        // same content, different position in the chain
        assert_eq!(first[1].id, second[1].id);
        assert_ne!(first_ctx.parent_chain, second_ctx.parent_chain);
    }

    #[test]
    fn test_env_change_reexecutes_run() {
        let f = fixture();
        let mut first = layers(&[(LayerKind::Env, "NAME=a"), (LayerKind::Run, "echo $NAME > name")]);
        f.run(&mut first).unwrap();

        let mut second = layers(&[(LayerKind::Env, "NAME=b"), (LayerKind::Run, "echo $NAME > name")]);
        let ctx = f.run(&mut second).unwrap();

        assert_ne!(first[1].id, second[1].id);
        assert!(!ctx.continue_cache);
        let run_dir = f.layers.layer_path(second[1].id.as_ref().unwrap());
        assert_eq!(fs::read_to_string(run_dir.join("name")).unwrap(), "b\n");
    }

    #[test]
    fn test_workdir_change_reexecutes_run() {
        let f = fixture();
        let mut first = layers(&[(LayerKind::Workdir, "/opt"), (LayerKind::Run, "touch marker")]);
        f.run(&mut first).unwrap();

        let mut second = layers(&[(LayerKind::Workdir, "/srv"), (LayerKind::Run, "touch marker")]);
        let ctx = f.run(&mut second).unwrap();

        assert!(!ctx.continue_cache);
        let run_dir = f.layers.layer_path(second[1].id.as_ref().unwrap());
        assert!(run_dir.join("srv/marker").is_file());
        assert!(!run_dir.join("opt").exists());
    }

    #[test]
    fn test_same_env_still_hits_cache() {
        let f = fixture();
        let spec = [(LayerKind::Env, "NAME=a"), (LayerKind::Run, "head -c 16 /dev/urandom > stamp")];
        let mut first = layers(&spec);
        f.run(&mut first).unwrap();

        let mut second = layers(&spec);
        let ctx = f.run(&mut second).unwrap();
        assert_eq!(first[1].id, second[1].id);
        assert!(ctx.continue_cache);
    }

    #[test]
    fn test_no_cache_executes_everything() {
        let mut f = fixture();
        let spec = [(LayerKind::Run, "head -c 16 /dev/urandom > stamp")];
        let mut first = layers(&spec);
        f.run(&mut first).unwrap();

        f.options.use_cache = false;
        let mut second = layers(&spec);
        let ctx = f.run(&mut second).unwrap();
        assert_ne!(first[0].id, second[0].id);
        assert!(!ctx.continue_cache);
    }

    #[test]
    fn test_failing_run_is_execution_error() {
        let f = fixture();
        let mut new = layers(&[(LayerKind::Copy, "a ."), (LayerKind::Run, "echo nope >&2; exit 1")]);
        match f.run(&mut new).unwrap_err() {
            StrataError::ExecutionError {
                index,
                kind,
                value,
                message,
            } => {
                assert_eq!(index, 2);
                assert_eq!(kind, "RUN");
                assert!(value.contains("exit 1"));
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(new[1].id.is_none());
    }

    #[test]
    fn test_zero_match_copy_is_validation_error() {
        let f = fixture();
        let mut new = layers(&[(LayerKind::Copy, "*.missing .")]);
        assert!(matches!(
            f.run(&mut new),
            Err(StrataError::ValidationError(_))
        ));
    }

    #[test]
    fn test_step_mounts_are_cleaned_up() {
        let f = fixture();
        let mut new = layers(&[(LayerKind::Copy, "a ."), (LayerKind::Run, "exit 1")]);
        assert!(f.run(&mut new).is_err());
        let leftovers = fs::read_dir(f.config.tmp_dir())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }
}
