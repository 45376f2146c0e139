//! Mutation engine.
//!
//! Runs an external file-based mutation tool (radamsa by default) against a
//! directory of example cases and reads the generated cases back.

use super::{SupplyError, read_cases};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Produces batches of mutated payloads from a directory of seed cases.
pub trait Mutator: Send + Sync {
    /// Generate `count` mutated payloads from the files in `seed_dir`.
    ///
    /// A `count` below 1 is treated as 1.
    fn generate(&self, seed_dir: &Path, count: usize) -> Result<Vec<Vec<u8>>, SupplyError>;
}

/// An external mutation tool invoked as a subprocess.
///
/// The tool is called as
/// `<program> [extra args...] -o <outdir>/%n.fuzz -n <count> -r <seed_dir>`
/// and must write `count` files into `<outdir>` before exiting 0.
#[derive(Debug, Clone)]
pub struct MutationTool {
    program: PathBuf,
    extra_args: Vec<OsString>,
}

impl MutationTool {
    /// Create a tool wrapper for the given executable.
    #[must_use]
    pub const fn new(program: PathBuf) -> Self {
        Self {
            program,
            extra_args: Vec::new(),
        }
    }

    /// Arguments placed before the standard ones (e.g. a script path when
    /// `program` is an interpreter, or `--seed`).
    #[must_use]
    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The executable that will be run.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Mutator for MutationTool {
    fn generate(&self, seed_dir: &Path, count: usize) -> Result<Vec<Vec<u8>>, SupplyError> {
        let count = count.max(1);

        // Each batch gets its own directory; dropping it removes the leftovers.
        let out_dir = tempfile::Builder::new()
            .prefix("brokerfuzz-")
            .tempdir()
            .map_err(SupplyError::OutputDir)?;

        info!(
            count,
            seed_dir = %seed_dir.display(),
            "Generating new fuzz cases"
        );

        let output = Command::new(&self.program)
            .args(&self.extra_args)
            .arg("-o")
            .arg(out_dir.path().join("%n.fuzz"))
            .arg("-n")
            .arg(count.to_string())
            .arg("-r")
            .arg(seed_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| SupplyError::ToolSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SupplyError::ToolFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let cases = read_cases(out_dir.path())?;
        if cases.is_empty() {
            return Err(SupplyError::EmptyBatch {
                dir: seed_dir.to_path_buf(),
            });
        }

        debug!(generated = cases.len(), requested = count, "Read back fuzz cases");
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FAKE_TOOL: &str = r#"
out=""; n=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -n) n="$2"; shift 2 ;;
    *) shift ;;
  esac
done
dir=$(dirname "$out")
i=1
while [ "$i" -le "$n" ]; do
  printf 'case-%s' "$i" > "$dir/$i.fuzz"
  i=$((i + 1))
done
"#;

    fn sh_tool(script: &str, dir: &Path) -> MutationTool {
        let path = dir.join("tool.sh");
        fs::write(&path, script).expect("write tool script");
        MutationTool::new(PathBuf::from("/bin/sh")).with_args([path])
    }

    fn seed_dir(dir: &Path) -> PathBuf {
        let seeds = dir.join("seeds");
        fs::create_dir(&seeds).expect("create seeds");
        fs::write(seeds.join("a"), b"hello").expect("write seed");
        seeds
    }

    #[test]
    fn test_generate_reads_every_output_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let tool = sh_tool(FAKE_TOOL, tmp.path());

        let cases = tool.generate(&seed_dir(tmp.path()), 5).expect("generate");

        assert_eq!(cases.len(), 5);
        assert!(cases.contains(&b"case-1".to_vec()));
        assert!(cases.contains(&b"case-5".to_vec()));
    }

    #[test]
    fn test_generate_coerces_zero_count_to_one() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let tool = sh_tool(FAKE_TOOL, tmp.path());

        let cases = tool.generate(&seed_dir(tmp.path()), 0).expect("generate");

        assert_eq!(cases, vec![b"case-1".to_vec()]);
    }

    #[test]
    fn test_nonzero_exit_is_reported_with_status_and_stderr() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let tool = sh_tool("echo 'bad seed' >&2\nexit 3\n", tmp.path());

        let err = tool
            .generate(&seed_dir(tmp.path()), 10)
            .expect_err("tool should fail");

        match err {
            SupplyError::ToolFailed { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "bad seed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let tool = MutationTool::new(PathBuf::from("/nonexistent/brokerfuzz-mutator"));
        let tmp = tempfile::tempdir().expect("tempdir");

        let err = tool
            .generate(tmp.path(), 1)
            .expect_err("spawn should fail");

        match err {
            SupplyError::ToolSpawn { program, .. } => assert_eq!(program, tool.program()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_silent_tool_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let tool = sh_tool("exit 0\n", tmp.path());

        let err = tool
            .generate(&seed_dir(tmp.path()), 3)
            .expect_err("no output should fail");

        assert!(matches!(err, SupplyError::EmptyBatch { .. }));
    }
}
