use std::io;

/// An `io::Write` sink that forwards each complete line as an `info` event
/// tagged with the resource it belongs to.
pub struct LogWriter {
    resource: String,
    buf: Vec<u8>,
    lines: Vec<String>,
    keep: bool,
}

impl LogWriter {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            buf: Vec::new(),
            lines: Vec::new(),
            keep: false,
        }
    }

    /// Also retain every emitted line for later inspection.
    pub fn capturing(resource: impl Into<String>) -> Self {
        let mut writer = Self::new(resource);
        writer.keep = true;
        writer
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn emit(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        tracing::info!(resource = %self.resource, "{line}");
        if self.keep {
            self.lines.push(line.to_owned());
        }
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.emit(&rest);
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}
