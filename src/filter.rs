//! Streaming content filter.
//!
//! A transducer sitting between the LLM stream and the event channel.
//! It removes `<TOOLCALL>…</TOOLCALL>` and `<THINKING>…</THINKING>`
//! spans, drops declared error-type tokens, and buffers just enough
//! text to recognize sentinels split across chunk boundaries — a
//! partial sentinel fragment is never emitted.

const SENTINELS: &[(&str, &str)] = &[
    ("<TOOLCALL>", "</TOOLCALL>"),
    ("<THINKING>", "</THINKING>"),
];

/// Incremental filter. Feed chunks with [`push`](ContentFilter::push),
/// then [`finish`](ContentFilter::finish) once the stream ends.
pub struct ContentFilter {
    /// Error-type tokens scrubbed from output (all-caps snake case).
    forbidden: Vec<String>,
    /// Pending input not yet classified as safe.
    buffer: String,
    /// End tag we are skipping toward, when inside a sentinel span.
    skipping_until: Option<&'static str>,
}

impl ContentFilter {
    pub fn new(forbidden_tokens: Vec<String>) -> Self {
        Self {
            forbidden: forbidden_tokens,
            buffer: String::new(),
            skipping_until: None,
        }
    }

    /// Feed one chunk; returns the text now safe to emit.
    pub fn push(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        self.drain(false)
    }

    /// Flush at end of stream. An unterminated sentinel span and any
    /// trailing partial sentinel are dropped.
    pub fn finish(&mut self) -> String {
        let out = self.drain(true);
        self.buffer.clear();
        self.skipping_until = None;
        out
    }

    fn drain(&mut self, at_end: bool) -> String {
        let mut out = String::new();

        loop {
            if let Some(end_tag) = self.skipping_until {
                match self.buffer.find(end_tag) {
                    Some(pos) => {
                        self.buffer.drain(..pos + end_tag.len());
                        self.skipping_until = None;
                    }
                    None => {
                        // Still inside the span: keep only the tail that
                        // could begin the end tag.
                        let keep = partial_suffix_len(&self.buffer, &[end_tag]);
                        let cut = self.buffer.len() - keep;
                        self.buffer.drain(..cut);
                        if at_end {
                            self.buffer.clear();
                        }
                        return out;
                    }
                }
                continue;
            }

            // Earliest full occurrence of any watched token.
            let mut earliest: Option<(usize, usize, Option<&'static str>)> = None;
            for (start, end) in SENTINELS {
                if let Some(pos) = self.buffer.find(start) {
                    if earliest.map(|(p, _, _)| pos < p).unwrap_or(true) {
                        earliest = Some((pos, start.len(), Some(end)));
                    }
                }
            }
            for token in &self.forbidden {
                if let Some(pos) = self.buffer.find(token.as_str()) {
                    if earliest.map(|(p, _, _)| pos < p).unwrap_or(true) {
                        earliest = Some((pos, token.len(), None));
                    }
                }
            }

            match earliest {
                Some((pos, token_len, end_tag)) => {
                    out.push_str(&self.buffer[..pos]);
                    self.buffer.drain(..pos + token_len);
                    self.skipping_until = end_tag;
                }
                None => {
                    // No full token: hold back the longest tail that is a
                    // prefix of a sentinel or forbidden token.
                    let mut watched: Vec<&str> =
                        SENTINELS.iter().map(|(s, _)| *s).collect();
                    watched.extend(self.forbidden.iter().map(String::as_str));
                    let keep = if at_end {
                        // Trailing partial *sentinel* fragments are never
                        // emitted; a partial forbidden token is plain text.
                        let sentinel_only: Vec<&str> =
                            SENTINELS.iter().map(|(s, _)| *s).collect();
                        let drop = partial_suffix_len(&self.buffer, &sentinel_only);
                        let emit_to = self.buffer.len() - drop;
                        out.push_str(&self.buffer[..emit_to]);
                        self.buffer.clear();
                        return out;
                    } else {
                        partial_suffix_len(&self.buffer, &watched)
                    };
                    let emit_to = self.buffer.len() - keep;
                    out.push_str(&self.buffer[..emit_to]);
                    self.buffer.drain(..emit_to);
                    return out;
                }
            }
        }
    }
}

/// Length of the longest buffer suffix that is a proper prefix of any
/// watched token.
fn partial_suffix_len(buffer: &str, tokens: &[&str]) -> usize {
    let max_probe = tokens.iter().map(|t| t.len() - 1).max().unwrap_or(0);
    let probe = max_probe.min(buffer.len());

    for len in (1..=probe).rev() {
        // Walk back to a char boundary.
        let start = buffer.len() - len;
        if !buffer.is_char_boundary(start) {
            continue;
        }
        let suffix = &buffer[start..];
        if tokens.iter().any(|t| t.len() > len && t.starts_with(suffix)) {
            return len;
        }
    }
    0
}

// ── Tests ─────────────────────────────────────────────────────────────────
