use skiff::{Interpreter, Options, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// A writer that accumulates into a shared buffer, so tests can assert on
/// the interpreter's virtualised output streams.
#[derive(Clone, Default)]
pub struct SharedBuf {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuf {
    pub fn new() -> SharedBuf {
        SharedBuf::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().expect("buffer lock")).to_string()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// An interpreter wired to capture buffers for stdout and stderr.
#[allow(dead_code)]
pub fn interp_with_output() -> (Interpreter, SharedBuf, SharedBuf) {
    let out = SharedBuf::new();
    let errs = SharedBuf::new();
    let interp = Interpreter::new(Options {
        stdout: Some(Box::new(out.clone())),
        stderr: Some(Box::new(errs.clone())),
        ..Options::default()
    });
    (interp, out, errs)
}

#[allow(dead_code)]
pub fn eval(src: &str) -> Value {
    let (interp, _, _) = interp_with_output();
    interp.eval(src).expect("eval")
}

#[allow(dead_code)]
pub fn eval_err(src: &str) -> skiff::Error {
    let (interp, _, _) = interp_with_output();
    interp.eval(src).expect_err("expected an error")
}
