//! Alignment through Hugin's `align_image_stack`, run as a child
//! process on its own thread.

use std::{
    ffi::OsString,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::AlignConfig;

// Where the pipe readers send the tool's output.  Closed (set to `None`)
// before `Finished` is sent.
type DataGate = Arc<Mutex<Option<Sender<AlignEvent>>>>;

#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    #[error("failed to start alignment tool: {0}")]
    FailedToStart(#[source] std::io::Error),

    #[error("alignment tool exited abnormally (status {0:?})")]
    AbnormalExit(Option<i32>),

    #[error("alignment tool crashed")]
    Crashed,

    #[error("alignment was cancelled")]
    Cancelled,

    #[error("alignment tool did not produce {}", .0.display())]
    MissingOutput(PathBuf),
}

/// Files written by the tool, one per input and in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalAlignment {
    pub files: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum AlignEvent {
    /// Output from the tool, as it arrives.
    Data(Vec<u8>),
    /// Always the last event.
    Finished(Result<ExternalAlignment, AlignError>),
}

/// Handle to a running external alignment.
pub struct AlignTask {
    events: Receiver<AlignEvent>,
    child: Arc<Mutex<Option<Child>>>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AlignTask {
    pub fn events(&self) -> &Receiver<AlignEvent> {
        &self.events
    }

    /// Kills the tool.  The task still finishes with a
    /// `Finished(Err(AlignError::Cancelled))` event.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.lock().unwrap().as_mut() {
            let _ = child.kill();
        }
    }

    /// Blocks until the task finishes, discarding the tool's output.
    pub fn wait(mut self) -> Result<ExternalAlignment, AlignError> {
        let mut outcome = Err(AlignError::Crashed);
        for event in self.events.iter() {
            if let AlignEvent::Finished(result) = event {
                outcome = result;
                break;
            }
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        outcome
    }
}

/// Name of the `index`th file written for output prefix `prefix`.
pub fn output_file(prefix: &Path, index: usize) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(format!("{:04}.tif", index));
    name.into()
}

/// Starts `align_image_stack` on `inputs`, writing its results to
/// `<prefix>0000.tif`, `<prefix>0001.tif`, and so on.
pub fn spawn_external(config: &AlignConfig, inputs: &[PathBuf], prefix: &Path) -> AlignTask {
    let (sender, receiver) = channel();
    let child = Arc::new(Mutex::new(None));
    let cancelled = Arc::new(AtomicBool::new(false));

    let mut command = Command::new(&config.tool);
    command.arg("-v").arg("-a").arg(prefix);
    if config.crop {
        command.arg("-C");
    }
    command
        .args(inputs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::info!(tool = ?config.tool, inputs = inputs.len(), crop = config.crop, "starting external alignment");

    let thread = {
        let child = Arc::clone(&child);
        let cancelled = Arc::clone(&cancelled);
        let prefix = prefix.to_path_buf();
        let count = inputs.len();
        let gate: DataGate = Arc::new(Mutex::new(Some(sender.clone())));
        thread::spawn(move || {
            let result = run(command, &child, &cancelled, &gate, &prefix, count);
            match result {
                Ok(_) => tracing::info!("external alignment finished"),
                Err(ref e) => tracing::warn!(error = %e, "external alignment failed"),
            }
            gate.lock().unwrap().take();
            let _ = sender.send(AlignEvent::Finished(result));
        })
    };

    AlignTask {
        events: receiver,
        child: child,
        cancelled: cancelled,
        thread: Some(thread),
    }
}

fn run(
    mut command: Command,
    child_slot: &Mutex<Option<Child>>,
    cancelled: &AtomicBool,
    gate: &DataGate,
    prefix: &Path,
    count: usize,
) -> Result<ExternalAlignment, AlignError> {
    let readers = {
        let mut slot = child_slot.lock().unwrap();
        if cancelled.load(Ordering::SeqCst) {
            return Err(AlignError::Cancelled);
        }
        let mut child = command.spawn().map_err(AlignError::FailedToStart)?;
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(forward(out, Arc::clone(gate)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward(err, Arc::clone(gate)));
        }
        *slot = Some(child);
        readers
    };

    let status = loop {
        {
            let mut slot = child_slot.lock().unwrap();
            let waited = match slot.as_mut() {
                Some(child) => child.try_wait(),
                None => return Err(AlignError::Crashed),
            };
            match waited {
                Ok(Some(status)) => {
                    *slot = None;
                    break status;
                }
                Ok(None) => {}
                Err(_) => {
                    *slot = None;
                    return Err(AlignError::Crashed);
                }
            }
        }
        thread::sleep(Duration::from_millis(10));
    };

    // A killed tool may leave children holding the pipes open, so the
    // readers are only waited for on a normal exit.
    if cancelled.load(Ordering::SeqCst) {
        return Err(AlignError::Cancelled);
    }
    for reader in readers {
        let _ = reader.join();
    }
    if !status.success() {
        return Err(match status.code() {
            Some(code) => AlignError::AbnormalExit(Some(code)),
            None => AlignError::Crashed,
        });
    }

    let files: Vec<PathBuf> = (0..count).map(|i| output_file(prefix, i)).collect();
    if let Some(missing) = files.iter().find(|f| !f.is_file()) {
        return Err(AlignError::MissingOutput(missing.clone()));
    }
    Ok(ExternalAlignment { files: files })
}

fn forward<R: Read + Send + 'static>(mut pipe: R, gate: DataGate) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            let n = match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let gate = gate.lock().unwrap();
            let sent = match gate.as_ref() {
                Some(sender) => sender.send(AlignEvent::Data(buf[..n].to_vec())).is_ok(),
                None => false,
            };
            if !sent {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tool: &str) -> AlignConfig {
        AlignConfig {
            tool: tool.into(),
            crop: false,
            temp_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let task = spawn_external(
            &config("/nonexistent/align_image_stack"),
            &[PathBuf::from("a.tif")],
            &dir.path().join("out_"),
        );
        assert!(matches!(task.wait(), Err(AlignError::FailedToStart(_))));
    }

    #[test]
    fn output_names() {
        assert_eq!(
            output_file(Path::new("/tmp/aligned_"), 3),
            PathBuf::from("/tmp/aligned_0003.tif")
        );
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake_align.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn abnormal_exit() {
        let dir = tempfile::tempdir().unwrap();
        let task = spawn_external(&config("false"), &[PathBuf::from("a.tif")], &dir.path().join("out_"));
        assert!(matches!(task.wait(), Err(AlignError::AbnormalExit(Some(1)))));
    }

    #[cfg(unix)]
    #[test]
    fn success_reports_output() {
        let dir = tempfile::tempdir().unwrap();
        // Arguments: -v -a <prefix> <files...>
        let tool = script(dir.path(), "echo aligning\ntouch \"${3}0000.tif\" \"${3}0001.tif\"");
        let prefix = dir.path().join("out_");
        let task = spawn_external(
            &config(tool.to_str().unwrap()),
            &[PathBuf::from("a.tif"), PathBuf::from("b.tif")],
            &prefix,
        );

        let mut output = Vec::new();
        let mut result = None;
        for event in task.events().iter() {
            match event {
                AlignEvent::Data(d) => output.extend_from_slice(&d),
                AlignEvent::Finished(r) => {
                    result = Some(r);
                    break;
                }
            }
        }
        assert!(String::from_utf8_lossy(&output).contains("aligning"));
        let alignment = result.unwrap().unwrap();
        assert_eq!(
            alignment.files,
            vec![output_file(&prefix, 0), output_file(&prefix, 1)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "touch \"${3}0000.tif\"");
        let prefix = dir.path().join("out_");
        let task = spawn_external(
            &config(tool.to_str().unwrap()),
            &[PathBuf::from("a.tif"), PathBuf::from("b.tif")],
            &prefix,
        );
        match task.wait() {
            Err(AlignError::MissingOutput(p)) => assert_eq!(p, output_file(&prefix, 1)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn cancel_kills_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "exec sleep 30");
        let task = spawn_external(&config(tool.to_str().unwrap()), &[], &dir.path().join("out_"));
        thread::sleep(Duration::from_millis(50));
        task.cancel();
        assert!(matches!(task.wait(), Err(AlignError::Cancelled)));
    }

    #[cfg(unix)]
    #[test]
    fn no_output_after_finished() {
        let dir = tempfile::tempdir().unwrap();
        // A background writer outlives the killed tool and keeps the
        // pipe open.
        let tool = script(
            dir.path(),
            "(while true; do echo tick; sleep 0.01; done) &\nexec sleep 30",
        );
        let task = spawn_external(&config(tool.to_str().unwrap()), &[], &dir.path().join("out_"));
        thread::sleep(Duration::from_millis(100));
        task.cancel();

        let mut finished = false;
        for event in task.events().iter() {
            match event {
                AlignEvent::Data(_) => assert!(!finished, "output after Finished"),
                AlignEvent::Finished(r) => {
                    assert!(matches!(r, Err(AlignError::Cancelled)));
                    finished = true;
                }
            }
        }
        assert!(finished);
    }
}
