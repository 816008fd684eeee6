// Wrappers for the external toolchain: pdftoppm (rasterization), oemer
// (optical music recognition), and MuseScore (rendering). Each is a plain
// blocking invocation; recognition and rendering run under a fixed timeout.

use anyhow::{bail, Context};
use std::ffi::OsStr;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How an external tool finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Exited(i32),
    TimedOut,
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ToolStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == ToolStatus::Exited(0)
    }
}

/// Run a command to completion, killing it if it exceeds the timeout.
/// stdout and stderr are drained on reader threads so a chatty tool cannot
/// deadlock on a full pipe.
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> anyhow::Result<ToolOutput> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to run '{program}'; is it installed?"))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break ToolStatus::Exited(status.code().unwrap_or(-1));
        }
        if Instant::now() >= deadline {
            // Kill and reap; the drain threads see EOF once the pipes close.
            let _ = child.kill();
            let _ = child.wait();
            break ToolStatus::TimedOut;
        }
        thread::sleep(Duration::from_millis(50));
    };
    Ok(ToolOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Rasterize a PDF into one PNG per page with pdftoppm. The tool numbers the
/// images by 1-based page index with uniform zero padding, so lexical order
/// is page order.
pub fn rasterize_pdf(
    bin: &str,
    pdf: &Path,
    out_dir: &Path,
    dpi: u32,
) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;
    let prefix = out_dir.join("page");
    let output = Command::new(bin)
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(pdf)
        .arg(&prefix)
        .output()
        .with_context(|| format!("failed to run '{bin}'; is poppler installed?"))?;
    if !output.status.success() {
        bail!(
            "{bin} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let mut images: Vec<PathBuf> = fs::read_dir(out_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension() == Some(OsStr::new("png")) {
                Some(path)
            } else {
                None
            }
        })
        .collect();
    images.sort();
    Ok(images)
}

/// Result of one page's optical recognition.
#[derive(Debug)]
pub enum Recognition {
    Score(PathBuf),
    Failed(String),
}

/// Run the optical recognizer on one page image. A tool failure or timeout
/// is reported, not fatal; the caller decides what a missing page means.
/// Failing to spawn the tool at all is still an error.
pub fn recognize_page(
    bin: &str,
    image: &Path,
    out_dir: &Path,
    timeout: Duration,
) -> anyhow::Result<Recognition> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;
    let mut command = Command::new(bin);
    command.arg(image).arg("-o").arg(out_dir);
    let output = run_with_timeout(command, timeout)?;
    match output.status {
        ToolStatus::TimedOut => Ok(Recognition::Failed(format!(
            "timed out after {}s",
            timeout.as_secs()
        ))),
        ToolStatus::Exited(0) => {
            // The recognizer picks the output file name; take what it wrote.
            let mut found: Vec<PathBuf> = fs::read_dir(out_dir)?
                .filter_map(|entry| {
                    let path = entry.ok()?.path();
                    match path.extension().and_then(OsStr::to_str) {
                        Some("musicxml") | Some("xml") => Some(path),
                        _ => None,
                    }
                })
                .collect();
            found.sort();
            match found.into_iter().next() {
                Some(path) => Ok(Recognition::Score(path)),
                None => Ok(Recognition::Failed("produced no MusicXML output".to_string())),
            }
        }
        ToolStatus::Exited(code) => Ok(Recognition::Failed(format!(
            "exited with status {code}: {}",
            last_line(&output.stderr)
        ))),
    }
}

/// Render a MusicXML score to PDF with MuseScore. Failure or timeout is
/// fatal; the tool's diagnostics are surfaced verbatim.
pub fn render_pdf(
    bin: &str,
    score: &Path,
    pdf: &Path,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut command = Command::new(bin);
    command.arg(score).arg("-o").arg(pdf);
    let output = run_with_timeout(command, timeout)?;
    match output.status {
        ToolStatus::Exited(0) => Ok(()),
        ToolStatus::TimedOut => bail!(
            "{bin} timed out after {}s rendering {}",
            timeout.as_secs(),
            score.display()
        ),
        ToolStatus::Exited(code) => bail!(
            "{bin} exited with status {code}: {}",
            output.stderr.trim()
        ),
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no diagnostic output")
}
