//! Compute workers in child processes.
//!
//! The engine side ([`WorkerProcess`]) spawns the configured program with
//! piped stdin and stdout, sends a `Setup` frame and then exchanges one
//! `Block` frame for one `Outputs` (or `Failure`) frame at a time. The child
//! side ([`serve_worker`]) is what `raster-blocks worker` runs. Child stderr
//! is inherited, so worker logging ends up next to the engine's.

use crate::associations::BlockAssociations;
use crate::chunking::BlockDefn;
use crate::error::{BlockError, Result};
use crate::transform::{BlockInfo, BlockTransform, RunInfo};
use crate::wire::{read_frame, write_frame, Frame};
use log::{debug, warn};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub struct WorkerProcess {
    name: String,
    child: Option<Child>,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    /// Start `program args...` and hand it the run description.
    pub fn spawn(name: &str, program: &Path, args: &[String], run: &RunInfo) -> Result<Self> {
        debug!("{}: starting {} {}", name, program.display(), args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let missing = |stream: &str| BlockError::Protocol(format!("{}: no {} pipe to child", name, stream));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        let mut worker = Self {
            name: name.to_string(),
            child: Some(child),
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        };
        write_frame(&mut worker.stdin, &Frame::Setup(run.clone()))?;
        Ok(worker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the transform on one block in the child.
    pub fn compute(&mut self, index: usize, block: BlockDefn, inputs: BlockAssociations) -> Result<BlockAssociations> {
        write_frame(&mut self.stdin, &Frame::Block { index, block, inputs })?;
        match read_frame(&mut self.stdout)? {
            Some(Frame::Outputs { index: got, outputs }) if got == index => Ok(outputs),
            Some(Frame::Outputs { index: got, .. }) => Err(BlockError::Protocol(format!(
                "{}: sent outputs of block {} for block {}",
                self.name, got, index
            ))),
            Some(Frame::Failure(msg)) => Err(BlockError::Transform(msg)),
            Some(other) => Err(BlockError::Protocol(format!(
                "{}: unexpected frame {:?}",
                self.name,
                frame_kind(&other)
            ))),
            None => Err(BlockError::Protocol(format!("{}: child closed its output", self.name))),
        }
    }

    /// Tell the child to stop and wait for it.
    pub fn shutdown(mut self) -> Result<()> {
        write_frame(&mut self.stdin, &Frame::Shutdown)?;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(BlockError::Protocol(format!("{}: child exited with {}", self.name, status)))
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("{}: stopping child process", self.name);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn frame_kind(frame: &Frame) -> &'static str {
    match frame {
        Frame::Setup(_) => "Setup",
        Frame::Block { .. } => "Block",
        Frame::Outputs { .. } => "Outputs",
        Frame::Failure(_) => "Failure",
        Frame::Shutdown => "Shutdown",
    }
}

/// Serve the worker protocol until `Shutdown` or end of input.
///
/// Transform failures are reported back as `Failure` frames and do not end
/// the loop; protocol errors do.
pub fn serve_worker<R: Read, W: Write>(transform: &dyn BlockTransform, input: R, output: W) -> Result<usize> {
    let mut input = BufReader::new(input);
    let mut output = BufWriter::new(output);
    let mut run: Option<RunInfo> = None;
    let mut served = 0;

    while let Some(frame) = read_frame(&mut input)? {
        match frame {
            Frame::Setup(info) => {
                debug!(
                    "Worker set up for {} blocks on a {}x{} grid",
                    info.total_blocks,
                    info.working_grid.ncols(),
                    info.working_grid.nrows()
                );
                run = Some(info);
            }
            Frame::Block { index, block, inputs } => {
                let run = run
                    .as_ref()
                    .ok_or_else(|| BlockError::Protocol("block received before setup".to_string()))?;
                let info = BlockInfo::new(run, index, block);
                let mut outputs = BlockAssociations::new();
                let reply = match transform.apply(&info, &inputs, &mut outputs) {
                    Ok(()) => Frame::Outputs { index, outputs },
                    Err(e) => Frame::Failure(e.to_string()),
                };
                write_frame(&mut output, &reply)?;
                served += 1;
            }
            Frame::Shutdown => break,
            other => {
                return Err(BlockError::Protocol(format!(
                    "worker received {} frame",
                    frame_kind(&other)
                )))
            }
        }
    }
    debug!("Worker served {} blocks", served);
    Ok(served)
}
