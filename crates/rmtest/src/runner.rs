//! Build the test module and run its suite inside a disposable server.

use anyhow::{anyhow, bail, Context, Result};
use disposable_redis::{DisposableRedis, HarnessSettings, InstanceConfig, ModuleBuild};
use std::path::PathBuf;
use tracing::info;

/// What to build and which tests to run.
#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub source: PathBuf,
    pub module: PathBuf,
    pub filter: String,
    pub compile: bool,
    pub build_inputs: Vec<String>,
}

/// Run the suite with overrides taken from the environment.
pub fn run_suite(options: &SuiteOptions) -> Result<()> {
    run_suite_with(options, HarnessSettings::from_env())
}

/// Run the suite with explicit harness overrides.
pub fn run_suite_with(options: &SuiteOptions, settings: HarnessSettings) -> Result<()> {
    if options.compile {
        ModuleBuild::new(&options.source, &options.module)
            .with_extra_inputs(options.build_inputs.clone())
            .run()?;
    }

    let config = InstanceConfig::new().with_arg("loadmodule", options.module.as_path());
    let mut server = DisposableRedis::with_settings(config, settings);

    info!("Running module tests matching {:?}", options.filter);
    let status = server
        .scoped(|client| -> Result<i64> {
            let reply = client.execute(["TM.RUNTESTS", options.filter.as_str()])?;
            reply
                .as_integer()
                .ok_or_else(|| anyhow!("unexpected TM.RUNTESTS reply: {:?}", reply))
        })
        .with_context(|| format!("running tests from {}", options.module.display()))?;

    if status != 0 {
        bail!("Tests failed! (status {})", status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use disposable_redis::HarnessError;

    #[test]
    fn test_startup_failure_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = SuiteOptions {
            source: dir.path().join("testmodule.c"),
            module: dir.path().join("__testmodule.so"),
            filter: "*".to_string(),
            compile: false,
            build_inputs: Vec::new(),
        };
        let settings = HarnessSettings {
            server_path: Some(dir.path().join("missing-redis-server")),
            ..HarnessSettings::default()
        };

        let err = run_suite_with(&options, settings).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::StartupFailed { .. })
        ));
    }
}
