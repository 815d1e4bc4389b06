//! Fake frontend, splitter and backend tools.
//!
//! Each fake honors the argument contract of the real tool it stands in for,
//! so stage code exercised with them sees exactly the argv shapes it would
//! hand to clang and llvm-split. Behavior is deterministic:
//!
//! - frontend: copies its input to `-o`; `-DFAKE_FAIL` makes it exit 1.
//! - splitter: cuts its input into at most `N` contiguous pieces, none empty.
//! - backend: accepts `-O0`..`-O3`, `-g`, `-c`, `-fPIC`; writes `\x7fOBJ` + input.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::Toolset;
use crate::tool::{ExternalTool, FnTool, ToolError, ToolOutput};

/// Prefix written before the input bytes by the fake backend.
pub const FAKE_OBJECT_MAGIC: &[u8] = b"\x7fOBJ";

const BACKEND_FLAGS: &[&str] = &["-O0", "-O1", "-O2", "-O3", "-g", "-c", "-fPIC"];

/// Split `args` into (leading flags, input, output) for `<flags…> <in> -o <out>`.
fn input_output(args: &[String]) -> Option<(&[String], PathBuf, PathBuf)> {
    let n = args.len();
    if n < 3 || args[n - 2] != "-o" {
        return None;
    }
    Some((&args[..n - 3], PathBuf::from(&args[n - 3]), PathBuf::from(&args[n - 1])))
}

fn usage(tool: &str) -> ToolOutput {
    ToolOutput::failure(2, format!("{}: usage: [flags...] <input> -o <output>\n", tool))
}

fn read_input(tool: &str, path: &Path) -> Result<Vec<u8>, ToolOutput> {
    fs::read(path).map_err(|e| {
        ToolOutput::failure(1, format!("{}: error: cannot read '{}': {}\n", tool, path.display(), e))
    })
}

/// Fake compiler frontend.
pub fn fake_frontend() -> Arc<dyn ExternalTool> {
    Arc::new(FnTool::new("fake-clang", |args: &[String]| {
        let Some((flags, input, output)) = input_output(args) else {
            return Ok(usage("fake-clang"));
        };
        if flags.iter().any(|f| f == "-DFAKE_FAIL") {
            return Ok(ToolOutput::failure(1, "fake-clang: error: FAKE_FAIL defined\n"));
        }
        let data = match read_input("fake-clang", &input) {
            Ok(data) => data,
            Err(out) => return Ok(out),
        };
        fs::write(&output, data)?;
        Ok(ToolOutput::success(Vec::new()))
    }))
}

/// Fake unit splitter.
pub fn fake_splitter() -> Arc<dyn ExternalTool> {
    Arc::new(FnTool::new("fake-llvm-split", |args: &[String]| {
        let chunks = args
            .iter()
            .find_map(|a| a.strip_prefix("-j"))
            .and_then(|n| n.parse::<usize>().ok());
        let (Some(chunks), Some((_, input, prefix))) = (chunks, input_output(args)) else {
            return Ok(usage("fake-llvm-split"));
        };
        let data = match read_input("fake-llvm-split", &input) {
            Ok(data) => data,
            Err(out) => return Ok(out),
        };

        let pieces = chunks.min(data.len());
        if pieces == 0 {
            return Ok(ToolOutput::success(Vec::new()));
        }
        let size = data.len().div_ceil(pieces);
        let prefix = prefix.to_string_lossy().into_owned();
        for (i, piece) in data.chunks(size).enumerate() {
            fs::write(format!("{}{}", prefix, i), piece)?;
        }
        Ok(ToolOutput::success(Vec::new()))
    }))
}

/// Fake compiler backend.
pub fn fake_backend() -> Arc<dyn ExternalTool> {
    Arc::new(FnTool::new("fake-clang", |args: &[String]| {
        let Some((flags, input, output)) = input_output(args) else {
            return Ok(usage("fake-clang"));
        };
        if let Some(bad) = flags.iter().find(|f| !BACKEND_FLAGS.contains(&f.as_str())) {
            return Ok(ToolOutput::failure(
                1,
                format!("fake-clang: error: unknown argument: '{}'\n", bad),
            ));
        }
        let data = match read_input("fake-clang", &input) {
            Ok(data) => data,
            Err(out) => return Ok(out),
        };
        let mut object = FAKE_OBJECT_MAGIC.to_vec();
        object.extend_from_slice(&data);
        fs::write(&output, object)?;
        Ok(ToolOutput::success(Vec::new()))
    }))
}

/// All three fakes together.
pub fn fake_toolset() -> Toolset {
    Toolset {
        frontend: fake_frontend(),
        splitter: fake_splitter(),
        backend: fake_backend(),
    }
}

/// A tool whose executable cannot be started.
pub fn missing_tool(name: &str) -> Arc<dyn ExternalTool> {
    let program = name.to_string();
    Arc::new(FnTool::new(name, move |_: &[String]| {
        Err(ToolError::Spawn {
            program: program.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_splitter_piece_count() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        fs::write(&input, vec![1u8; 10]).unwrap();
        let parts = temp.path().join("parts");
        fs::create_dir(&parts).unwrap();

        let prefix = format!("{}/", parts.display());
        let out = fake_splitter()
            .invoke(&s(&["-j4", input.to_str().unwrap(), "-o", &prefix]))
            .unwrap();
        assert!(out.is_success());
        assert_eq!(fs::read_dir(&parts).unwrap().count(), 4);
    }

    #[test]
    fn test_splitter_never_exceeds_input_length() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        fs::write(&input, b"ab").unwrap();
        let parts = temp.path().join("parts");
        fs::create_dir(&parts).unwrap();

        let prefix = format!("{}/", parts.display());
        fake_splitter()
            .invoke(&s(&["-j8", input.to_str().unwrap(), "-o", &prefix]))
            .unwrap();
        assert_eq!(fs::read_dir(&parts).unwrap().count(), 2);
    }

    #[test]
    fn test_backend_rejects_unknown_flag() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        fs::write(&input, b"x").unwrap();
        let output = temp.path().join("out");

        let out = fake_backend()
            .invoke(&s(&["-Ofast9", input.to_str().unwrap(), "-o", output.to_str().unwrap()]))
            .unwrap();
        assert!(!out.is_success());
        assert!(String::from_utf8_lossy(&out.stderr).contains("unknown argument: '-Ofast9'"));
        assert!(!output.exists());
    }

    #[test]
    fn test_backend_writes_object() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        fs::write(&input, b"ir").unwrap();
        let output = temp.path().join("out");

        let out = fake_backend()
            .invoke(&s(&["-O2", input.to_str().unwrap(), "-o", output.to_str().unwrap()]))
            .unwrap();
        assert!(out.is_success());
        assert_eq!(fs::read(&output).unwrap(), b"\x7fOBJir");
    }
}
