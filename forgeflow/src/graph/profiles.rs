//! Built-in stage graphs for the supported build profiles.
//!
//! These replace the hand-copied recipe variants the orchestrator grew out
//! of: one parameterized graph per profile instead of near-duplicate files
//! that drift apart.

use super::{GraphBuilder, Operation, StageSpec, StageGraph};
use crate::config::{BuildConfiguration, Profile};
use crate::errors::GraphValidationError;

/// Builds the stage graph for the configured profile.
///
/// The `framework` profile is the five-stage core pipeline:
/// fetch → extract → link → compile → collect. The extended profile appends
/// vision and audio sub-pipelines after the framework compile; their
/// compile/collect stages are best-effort unless `strict_extras` is set.
///
/// # Errors
///
/// Returns a [`GraphValidationError`] if the built-in definitions are
/// inconsistent; that is an internal defect, not an operator mistake.
pub fn profile_graph(config: &BuildConfiguration) -> Result<StageGraph, GraphValidationError> {
    let profile = config.profile();
    let mut builder = framework_stages(GraphBuilder::new(profile.as_str()))?;

    if profile == Profile::FrameworkVisionAudio {
        let strict = config.toggle("strict_extras");
        builder = extension_stages(builder, "vision", "vision_version", strict)?;
        builder = extension_stages(builder, "audio", "audio_version", strict)?;
    }

    builder.build()
}

fn framework_stages(builder: GraphBuilder) -> Result<GraphBuilder, GraphValidationError> {
    builder
        .stage(
            StageSpec::new(
                "fetch",
                Operation::Fetch {
                    url: "{source_base}/framework-{framework_version}.tar.gz".to_string(),
                    dest: "downloads/framework-{framework_version}.tar.gz".to_string(),
                    checksum: None,
                },
            )
            .with_output("downloads/framework-{framework_version}.tar.gz")
            .idempotent(),
        )?
        .stage(
            StageSpec::new(
                "extract",
                Operation::Extract {
                    archive: "downloads/framework-{framework_version}.tar.gz".to_string(),
                    dest: "src/framework".to_string(),
                },
            )
            .after("fetch")
            .with_output("src/framework"),
        )?
        .stage(
            StageSpec::new(
                "link",
                Operation::Link {
                    target: "{toolchain_root}/lib/libaccelrt.so.{runtime_version}".to_string(),
                    link: "links/libaccelrt.so".to_string(),
                },
            )
            .after("extract")
            .with_output("links/libaccelrt.so")
            .idempotent(),
        )?
        .stage(
            StageSpec::new(
                "compile",
                Operation::Compile {
                    command: "python setup.py bdist_wheel".to_string(),
                    workdir: "src/framework".to_string(),
                    env: vec![
                        ("MAX_JOBS".to_string(), "{jobs}".to_string()),
                        ("ARCH_LIST".to_string(), "{arch_list}".to_string()),
                        (
                            "TOOLKIT_VERSION".to_string(),
                            "{toolkit_version}".to_string(),
                        ),
                    ],
                },
            )
            .after("link")
            .with_output("src/framework/dist"),
        )?
        .stage(
            StageSpec::new(
                "collect",
                Operation::Collect {
                    root: "src/framework/dist".to_string(),
                    pattern: "*.whl".to_string(),
                },
            )
            .after("compile"),
        )
}

/// Appends the fetch/extract/compile/collect chain for one extension
/// (vision or audio). Extensions build against the compiled framework, so
/// their fetch depends on the framework compile stage.
fn extension_stages(
    builder: GraphBuilder,
    name: &str,
    version_param: &str,
    strict: bool,
) -> Result<GraphBuilder, GraphValidationError> {
    let fetch = format!("fetch-{name}");
    let extract = format!("extract-{name}");
    let compile = format!("compile-{name}");
    let collect = format!("collect-{name}");
    let archive = format!("downloads/{name}-{{{version_param}}}.tar.gz");
    let srcdir = format!("src/{name}");

    let mut compile_spec = StageSpec::new(
        &compile,
        Operation::Compile {
            command: "python setup.py bdist_wheel".to_string(),
            workdir: srcdir.clone(),
            env: vec![("MAX_JOBS".to_string(), "{jobs}".to_string())],
        },
    )
    .after(&extract)
    .with_output(format!("{srcdir}/dist"));

    let mut collect_spec = StageSpec::new(
        &collect,
        Operation::Collect {
            root: format!("{srcdir}/dist"),
            pattern: "*.whl".to_string(),
        },
    )
    .after(&compile);

    if !strict {
        compile_spec = compile_spec.best_effort();
        collect_spec = collect_spec.best_effort();
    }

    builder
        .stage(
            StageSpec::new(
                &fetch,
                Operation::Fetch {
                    url: format!("{{source_base}}/{name}-{{{version_param}}}.tar.gz"),
                    dest: archive.clone(),
                    checksum: None,
                },
            )
            .after("compile")
            .with_output(archive.clone())
            .idempotent(),
        )?
        .stage(
            StageSpec::new(
                &extract,
                Operation::Extract {
                    archive,
                    dest: srcdir.clone(),
                },
            )
            .after(&fetch)
            .with_output(srcdir),
        )?
        .stage(compile_spec)?
        .stage(collect_spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParameterResolver;
    use pretty_assertions::assert_eq;

    #[test]
    fn framework_profile_runs_the_five_core_stages_in_order() {
        let config = ParameterResolver::new(Profile::Framework)
            .resolve()
            .expect("resolves");
        let graph = profile_graph(&config).expect("builds");

        assert_eq!(
            graph.execution_order(),
            ["fetch", "extract", "link", "compile", "collect"]
        );
    }

    #[test]
    fn extended_profile_appends_vision_and_audio_chains() {
        let config = ParameterResolver::new(Profile::FrameworkVisionAudio)
            .resolve()
            .expect("resolves");
        let graph = profile_graph(&config).expect("builds");

        let order = graph.execution_order();
        assert_eq!(order.len(), 13);
        assert_eq!(&order[..5], ["fetch", "extract", "link", "compile", "collect"]);
        assert!(order.contains(&"compile-vision".to_string()));
        assert!(order.contains(&"collect-audio".to_string()));

        // Extensions are best-effort by default.
        assert!(graph.stage("compile-vision").expect("exists").best_effort);
        assert!(graph.stage("compile-audio").expect("exists").best_effort);
    }

    #[test]
    fn strict_extras_makes_extension_failures_fatal() {
        let config = ParameterResolver::new(Profile::FrameworkVisionAudio)
            .with_override("strict_extras", "true")
            .resolve()
            .expect("resolves");
        let graph = profile_graph(&config).expect("builds");

        assert!(!graph.stage("compile-vision").expect("exists").best_effort);
        assert!(!graph.stage("collect-audio").expect("exists").best_effort);
    }

    #[test]
    fn profile_templates_resolve_against_default_configuration() {
        for profile in [Profile::Framework, Profile::FrameworkVisionAudio] {
            let config = ParameterResolver::new(profile).resolve().expect("resolves");
            let graph = profile_graph(&config).expect("builds");
            graph
                .validate_against(&config)
                .expect("all built-in templates must resolve");
        }
    }
}
