//! Build a loadable server module from C source.
//!
//! A throwaway Makefile is generated and piped into `make -f -`, so the usual
//! `CC`, `CFLAGS`, `LDFLAGS` and `SHOBJ_*` variables from the environment or
//! the command line apply. This is plumbing in front of the harness: a failed
//! build is fatal and no server is started.

use crate::error::{HarnessError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{error, info};

/// Compiler/linker invocation used by the generated rule.
const BUILD_FLAGS: &[&str] = &[
    "$(CC)",
    "$(CFLAGS)",
    "$(CPPFLAGS)",
    "$(SHOBJ_CFLAGS)",
    "$(SHOBJ_CPPFLAGS)",
    "-o",
    "$@",
    "$^",
    "$(LDFLAGS)",
    "$(SHOBJ_LDFLAGS)",
];

/// One module build: `source` compiled into the shared object `module`.
#[derive(Debug, Clone)]
pub struct ModuleBuild {
    /// C source file.
    pub source: PathBuf,
    /// Output shared object.
    pub module: PathBuf,
    /// Extra prerequisites (objects, archives) linked into the module.
    pub extra_inputs: Vec<String>,
    /// Build tool; `make` unless overridden.
    pub make_program: String,
}

impl ModuleBuild {
    pub fn new(source: impl AsRef<Path>, module: impl AsRef<Path>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            module: module.as_ref().to_path_buf(),
            extra_inputs: Vec::new(),
            make_program: "make".to_string(),
        }
    }

    /// Set extra prerequisites for the module rule.
    pub fn with_extra_inputs(mut self, inputs: Vec<String>) -> Self {
        self.extra_inputs = inputs;
        self
    }

    /// Use a different build tool.
    pub fn with_make_program(mut self, program: impl Into<String>) -> Self {
        self.make_program = program.into();
        self
    }

    /// The Makefile fed to the build tool.
    pub fn makefile(&self) -> String {
        let module = self.module.display();
        let mut prerequisites = vec![self.source.display().to_string()];
        prerequisites.extend(self.extra_inputs.iter().cloned());

        let mut flags: Vec<&str> = BUILD_FLAGS.to_vec();
        if cfg!(target_os = "macos") {
            flags.push("-bundle -undefined dynamic_lookup");
        }
        flags.push("-lc");

        format!(
            "all: {module}\n\n{module}: {prereqs}\n\t{recipe}\n",
            module = module,
            prereqs = prerequisites.join(" "),
            recipe = flags.join(" "),
        )
    }

    /// Run the build, inheriting stdout/stderr so compiler output is visible.
    pub fn run(&self) -> Result<()> {
        info!(
            "Compiling {} into {}",
            self.source.display(),
            self.module.display()
        );

        let mut child = Command::new(&self.make_program)
            .args(["-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.compile_error(format!("failed to run {}: {}", self.make_program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(self.makefile().as_bytes()) {
                Ok(()) => {}
                // Tool exited without reading the Makefile; its status says why.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.compile_error(format!("failed to write Makefile: {}", e)));
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| self.compile_error(format!("failed to wait for {}: {}", self.make_program, e)))?;

        if !status.success() {
            error!("Module build failed: {}", status);
            return Err(self.compile_error(format!("{} exited with {}", self.make_program, status)));
        }

        info!("Built module {}", self.module.display());
        Ok(())
    }

    fn compile_error(&self, message: String) -> HarnessError {
        HarnessError::Compile {
            module: self.module.clone(),
            message,
        }
    }
}
