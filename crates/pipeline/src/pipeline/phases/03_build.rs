use crate::build::BuildRequest;
use crate::error::PipelineError;
use crate::fingerprint::{default_image, fingerprint, FingerprintInput};
use crate::output::MaskingSink;
use crate::pipeline::context::{BuildReport, PipelineContext, RunContext};
use crate::pipeline::orchestrator::Coordinator;
use crate::pipeline::phase_trait::CoordinatorPhase;
use crate::pipeline::state::PipelineState;
use crate::pipeline::variables;
use crate::record::{BuildOutput, RunRecord};
use anyhow::Result;
use async_trait::async_trait;
use deckhand_core::manifest::{build_waves, BuildTarget};
use deckhand_core::{Masker, PipelineEvent, ResolvedVars};
use deckhand_stack::load_stack;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Manifest build targets plus one implicit target per compose service that
/// declares `build` and has no manifest target of the same name.
pub fn collect_targets(run: &RunContext) -> Vec<BuildTarget> {
    let base = run.manifest.base_dir();
    let mut targets: Vec<BuildTarget> = run
        .manifest
        .build
        .iter()
        .map(|t| BuildTarget {
            context: base.join(&t.context),
            ..t.clone()
        })
        .collect();

    if let Some(stack) = &run.stack {
        for svc in stack.services.values() {
            let Some(build) = &svc.build else { continue };
            if targets.iter().any(|t| t.name == svc.name) {
                continue;
            }
            targets.push(BuildTarget {
                context: build.context.clone(),
                dockerfile: build
                    .dockerfile
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("Dockerfile")),
                image: svc.image.clone(),
                target: build.target.clone(),
                args: build.args.clone(),
                ..BuildTarget::new(svc.name.clone())
            });
        }
    }
    targets
}

fn expand_target(target: &BuildTarget, vars: &ResolvedVars) -> BuildTarget {
    let expand_pairs = |pairs: &[(String, String)]| -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.clone(), vars.expand(v)))
            .collect()
    };
    BuildTarget {
        image: target.image.as_deref().map(|i| vars.expand(i)),
        args: expand_pairs(&target.args),
        secrets: expand_pairs(&target.secrets),
        cache_from: target.cache_from.iter().map(|c| vars.expand(c)).collect(),
        ..target.clone()
    }
}

struct BuildEnv<'a> {
    ctx: &'a PipelineContext,
    previous: Option<&'a RunRecord>,
    commit: Option<&'a str>,
    force: bool,
    namespace: &'a str,
    stack: &'a str,
    masker: Masker,
}

async fn build_one(env: &BuildEnv<'_>, target: &BuildTarget) -> Result<BuildReport, PipelineError> {
    let ctx = env.ctx;
    let mut request = BuildRequest {
        target: target.name.clone(),
        context: target.context.clone(),
        dockerfile: target.dockerfile.clone(),
        image: String::new(),
        stage: target.target.clone(),
        args: target.args.clone(),
        secrets: target.secrets.clone(),
        cache_from: target.cache_from.clone(),
    };
    let fp = fingerprint(&FingerprintInput::from_request(
        &request,
        env.commit,
        target.image.as_deref(),
    ));
    request.image = target.image.clone().unwrap_or_else(|| {
        default_image(&ctx.config.registry, env.namespace, env.stack, &target.name, &fp)
    });

    let recorded = env
        .previous
        .and_then(|r| r.builds.get(&target.name))
        .filter(|r| fp.reliable && r.fingerprint == fp.digest);

    if let (false, Some(recorded)) = (env.force, recorded) {
        match ctx.builder.image_exists(&recorded.image).await {
            Ok(true) => {
                let reason = format!("fingerprint {} unchanged", fp.short());
                ctx.progress.on_progress(&PipelineEvent::BuildSkipped {
                    target: target.name.clone(),
                    reason: reason.clone(),
                });
                return Ok(BuildReport {
                    target: target.name.clone(),
                    image: recorded.image.clone(),
                    fingerprint: fp.digest,
                    skipped: Some(reason),
                    forced: false,
                });
            }
            Ok(false) => {
                info!(target_name = %target.name, reason = "image not found", "Rebuilding");
            }
            Err(e) => {
                warn!(target_name = %target.name, error = %e, "Could not check for the recorded image, rebuilding");
            }
        }
    }

    ctx.progress.on_progress(&PipelineEvent::BuildStarted {
        target: target.name.clone(),
        forced: env.force,
    });
    let sink = MaskingSink::new(ctx.sink.clone(), env.masker.clone());
    let started = Instant::now();
    let result = ctx
        .builder
        .build(&request, &sink)
        .await
        .map_err(|e| PipelineError::Build {
            target: target.name.clone(),
            message: env.masker.mask(&format!("{:#}", e)).into_owned(),
        })?;
    ctx.progress.on_progress(&PipelineEvent::BuildComplete {
        target: target.name.clone(),
        image: result.image.clone(),
        cache_hit: result.cache_hit,
        duration: started.elapsed(),
    });

    Ok(BuildReport {
        target: target.name.clone(),
        image: result.image,
        fingerprint: fp.digest,
        skipped: None,
        forced: env.force,
    })
}

/// Builds every target whose inputs changed, wave by wave. Targets of one
/// wave build concurrently; later waves see the image variables of earlier
/// ones.
pub struct BuildPhase;

#[async_trait]
impl CoordinatorPhase for BuildPhase {
    fn name(&self) -> &'static str {
        "build"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Building
    }

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()> {
        let ctx = coordinator.context();
        if run.stack.is_none() && !run.manifest.deploy.compose.is_empty() {
            run.stack = Some(load_stack(
                &run.manifest.deploy.compose,
                run.manifest.base_dir(),
                &run.name,
                &run.vars,
            )?);
        }

        let targets = collect_targets(run);
        if targets.is_empty() {
            return Ok(());
        }
        let waves: Vec<Vec<BuildTarget>> = build_waves(&targets)?
            .into_iter()
            .map(|wave| wave.into_iter().cloned().collect())
            .collect();

        for (index, wave) in waves.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled.into());
            }
            info!(wave = index + 1, targets = wave.len(), "Building wave");

            let prepared: Vec<BuildTarget> = wave.iter().map(|t| expand_target(t, &run.vars)).collect();
            let reports = {
                let env = BuildEnv {
                    ctx,
                    previous: run.previous.as_ref(),
                    commit: run.git.commit.as_deref(),
                    force: run.options.force_build,
                    namespace: &run.namespace,
                    stack: &run.name,
                    masker: run.masker(),
                };
                join_all(prepared.iter().map(|t| build_one(&env, t)))
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, PipelineError>>()?
            };

            for report in reports {
                for (name, value) in variables::build_variables(&report.target, &report.image) {
                    run.vars.set_builtin(name, value, false);
                }
                run.record.builds.insert(
                    report.target.clone(),
                    BuildOutput {
                        fingerprint: report.fingerprint.clone(),
                        image: report.image.clone(),
                    },
                );
                run.builds.push(report);
            }
        }
        Ok(())
    }
}
