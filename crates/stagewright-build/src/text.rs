/// Line-oriented builder for generated scripts and Dockerfiles.
#[derive(Debug, Default)]
pub(crate) struct Text {
    buf: String,
}

impl Text {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn line(&mut self, line: impl AsRef<str>) {
        self.buf.push_str(line.as_ref());
        self.buf.push('\n');
    }

    pub(crate) fn blank(&mut self) {
        self.buf.push('\n');
    }

    /// Append pre-formatted text verbatim.
    pub(crate) fn raw(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    pub(crate) fn finish(self) -> String {
        self.buf
    }
}

/// Make arbitrary text safe to place after `#` on a single line.
pub(crate) fn comment_safe(text: &str) -> String {
    text.replace('\n', "\\n").replace('\r', "\\r")
}
