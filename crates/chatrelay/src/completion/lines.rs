//! Reassembles streamed deltas into complete lines.

/// Buffers deltas and yields each line as soon as its newline arrives.
///
/// Emitted lines are trimmed and blank lines are skipped. The text after the
/// last newline is returned by [`finish`](Self::finish).
#[derive(Debug, Default, Clone)]
pub struct LineAssembler {
    pending: String,
    full: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a delta and return the lines it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.full.push_str(delta);
        self.pending.push_str(delta);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Take the unterminated remainder. May be empty.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending).trim().to_string()
    }

    /// Everything received so far, verbatim.
    pub fn full_text(&self) -> &str {
        &self.full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_lines_across_deltas() {
        let mut asm = LineAssembler::new();
        assert!(asm.push("Hello ").is_empty());
        assert_eq!(asm.push("world.\n"), vec!["Hello world."]);
        assert!(asm.push("Bye").is_empty());
        assert_eq!(asm.finish(), "Bye");
        assert_eq!(asm.full_text(), "Hello world.\nBye");
    }

    #[test]
    fn one_delta_can_complete_several_lines() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push("a\nb\r\n\n  \nc"), vec!["a", "b"]);
        assert_eq!(asm.finish(), "c");
    }

    #[test]
    fn finish_after_trailing_newline_is_empty() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push("done.\n"), vec!["done."]);
        assert_eq!(asm.finish(), "");
        assert_eq!(asm.finish(), "");
    }

    #[test]
    fn multibyte_text_is_preserved() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push("héllo 🖉\nñ"), vec!["héllo 🖉"]);
        assert_eq!(asm.finish(), "ñ");
    }
}
