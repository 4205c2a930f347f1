use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::debug;

use super::PageRasterizer;
use crate::model::BASE_DPI;

/// Renders pages through `mutool draw` or, failing that, `pdftoppm`.
///
/// Nothing touches the filesystem until the first page is requested; the
/// source document is then staged once in a private temp dir and each page
/// bitmap is removed right after decoding.
pub struct CliRasterizer<'a> {
    pdf: &'a [u8],
    staged: Option<Staged>,
}

struct Staged {
    dir: TempDir,
    input: PathBuf,
    tool: RenderTool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderTool {
    Mutool,
    Pdftoppm,
}

impl<'a> CliRasterizer<'a> {
    pub fn new(pdf: &'a [u8]) -> Self {
        Self { pdf, staged: None }
    }

    fn staged(&mut self) -> Result<&Staged> {
        if self.staged.is_none() {
            self.staged = Some(Staged::new(self.pdf)?);
        }
        self.staged
            .as_ref()
            .ok_or_else(|| anyhow!("pdf was not staged for rendering"))
    }
}

impl Staged {
    fn new(pdf: &[u8]) -> Result<Self> {
        let tool = if command_exists("mutool") {
            RenderTool::Mutool
        } else if command_exists("pdftoppm") {
            RenderTool::Pdftoppm
        } else {
            return Err(anyhow!(
                "pdf rendering requires mutool or pdftoppm (install mupdf or poppler)"
            ));
        };
        let dir = tempfile::Builder::new()
            .prefix("pdf-translate-render")
            .tempdir()
            .with_context(|| "failed to create temp dir for pdf")?;
        let input = dir.path().join("input.pdf");
        fs::write(&input, pdf).with_context(|| "failed to write temp pdf")?;
        debug!("rasterizing with {}", tool.name());
        Ok(Self { dir, input, tool })
    }

    fn render_to_file(&self, page_number: usize, dpi: u32) -> Result<PathBuf> {
        let (output, path) = match self.tool {
            RenderTool::Mutool => {
                let out = self.dir.path().join(format!("page-{:04}.png", page_number));
                let output = Command::new("mutool")
                    .arg("draw")
                    .arg("-r")
                    .arg(dpi.to_string())
                    .arg("-o")
                    .arg(&out)
                    .arg(&self.input)
                    .arg(page_number.to_string())
                    .output()
                    .with_context(|| "failed to run mutool")?;
                (output, out)
            }
            RenderTool::Pdftoppm => {
                let prefix = self.dir.path().join(format!("page-{:04}", page_number));
                let output = Command::new("pdftoppm")
                    .arg("-png")
                    .arg("-r")
                    .arg(dpi.to_string())
                    .arg("-f")
                    .arg(page_number.to_string())
                    .arg("-l")
                    .arg(page_number.to_string())
                    .arg("-singlefile")
                    .arg(&self.input)
                    .arg(&prefix)
                    .output()
                    .with_context(|| "failed to run pdftoppm")?;
                (output, prefix.with_extension("png"))
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} failed on page {}: {}",
                self.tool.name(),
                page_number,
                stderr.trim()
            ));
        }
        Ok(path)
    }
}

impl RenderTool {
    fn name(self) -> &'static str {
        match self {
            RenderTool::Mutool => "mutool",
            RenderTool::Pdftoppm => "pdftoppm",
        }
    }
}

impl PageRasterizer for CliRasterizer<'_> {
    fn render(&mut self, index: usize, scale: f32) -> Result<DynamicImage> {
        let dpi = (BASE_DPI * scale).round().max(1.0) as u32;
        let path = self.staged()?.render_to_file(index + 1, dpi)?;
        let image = image::open(&path)
            .with_context(|| format!("failed to decode rendered page {}", index + 1));
        let _ = fs::remove_file(&path);
        image
    }
}

/// Whether `cmd` resolves to an executable, either as a path or via `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    let path = Path::new(cmd);
    if path.components().count() > 1 {
        return is_executable(path);
    }
    let Some(path_var) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path_var).any(|dir| {
        command_candidates(cmd)
            .iter()
            .any(|candidate| is_executable(&dir.join(candidate)))
    })
}

#[cfg(windows)]
fn command_candidates(cmd: &str) -> Vec<String> {
    if Path::new(cmd).extension().is_some() {
        return vec![cmd.to_string()];
    }
    let pathext = env::var_os("PATHEXT").unwrap_or_else(|| ".EXE;.CMD;.BAT;.COM".into());
    pathext
        .to_string_lossy()
        .split(';')
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!("{}{}", cmd, ext.to_lowercase()))
        .collect()
}

#[cfg(not(windows))]
fn command_candidates(cmd: &str) -> Vec<String> {
    vec![cmd.to_string()]
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn detects_executable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        let path = script.to_string_lossy().to_string();

        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!command_exists(&path));

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(command_exists(&path));
    }

    #[test]
    fn construction_does_not_require_render_tools() {
        let mut rasterizer = CliRasterizer::new(b"%PDF-1.5");
        assert!(rasterizer.staged.is_none());
        if !command_exists("mutool") && !command_exists("pdftoppm") {
            assert!(rasterizer.render(0, 1.0).is_err());
        }
    }

    #[test]
    fn missing_command_is_not_found() {
        assert!(!command_exists("pdf-translate-definitely-missing-tool"));
        assert!(!command_exists("/nonexistent/dir/tool"));
    }
}
