//! Incremental reply post-processing.
//!
//! Models tend to continue the dialogue past their own line ("...\nUser: ...").
//! `ReplyFilter` drops noise characters and, when `first_line_only` is set,
//! stops at the end of the first non-empty line. It works chunk by chunk so
//! accepted text can be forwarded while generation is still running, and the
//! forwarded text always equals the trimmed final reply.

use crate::config::ChatConfig;

pub struct ReplyFilter {
    noise: Vec<char>,
    first_line_only: bool,
    reply: String,
    /// Whitespace seen after content; only emitted if more content follows
    pending_space: String,
    done: bool,
}

impl ReplyFilter {
    pub fn new(config: &ChatConfig) -> Self {
        let noise = if config.strip_noise_chars {
            config.noise_chars.chars().collect()
        } else {
            Vec::new()
        };
        Self {
            noise,
            first_line_only: config.first_line_only,
            reply: String::new(),
            pending_space: String::new(),
            done: false,
        }
    }

    /// Feed one raw chunk; returns the text that may be forwarded now
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        let mut out = String::new();

        for c in chunk.chars() {
            if self.done {
                break;
            }
            if self.noise.contains(&c) {
                continue;
            }
            if self.first_line_only && (c == '\n' || c == '\r') {
                if !self.reply.is_empty() || !out.is_empty() {
                    self.done = true;
                }
                self.pending_space.clear();
                continue;
            }
            if c.is_whitespace() {
                if !self.reply.is_empty() || !out.is_empty() {
                    self.pending_space.push(c);
                }
                continue;
            }
            out.push_str(&self.pending_space);
            self.pending_space.clear();
            out.push(c);
        }

        self.reply.push_str(&out);
        (!out.is_empty()).then_some(out)
    }

    /// True once the first line has ended and further input is ignored
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The canonical reply: everything forwarded so far
    pub fn finish(self) -> String {
        self.reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(strip: bool, first_line_only: bool) -> ReplyFilter {
        ReplyFilter::new(&ChatConfig {
            strip_noise_chars: strip,
            first_line_only,
            noise_chars: ",".to_string(),
            ..ChatConfig::default()
        })
    }

    fn run(mut filter: ReplyFilter, chunks: &[&str]) -> (Vec<String>, String) {
        let forwarded = chunks.iter().filter_map(|c| filter.push(c)).collect();
        (forwarded, filter.finish())
    }

    #[test]
    fn test_first_line_and_commas() {
        let (forwarded, reply) = run(
            filter(true, true),
            &["Well, ", "hello there", "!\nUser: and", " more"],
        );
        assert_eq!(reply, "Well hello there!");
        assert_eq!(forwarded.concat(), reply);
    }

    #[test]
    fn test_skips_leading_blank_lines() {
        let (_, reply) = run(filter(true, true), &["\n  \n", ",,\n", "  Hi there  ", "\nnext"]);
        assert_eq!(reply, "Hi there");
    }

    #[test]
    fn test_trailing_whitespace_is_not_forwarded() {
        let mut f = filter(true, true);
        assert_eq!(f.push("Hi "), Some("Hi".to_string()));
        assert_eq!(f.push(" "), None);
        assert_eq!(f.push("you"), Some("  you".to_string()));
        assert!(!f.is_done());
        assert_eq!(f.push("\n"), None);
        assert!(f.is_done());
        assert_eq!(f.push("ignored"), None);
        assert_eq!(f.finish(), "Hi  you");
    }

    #[test]
    fn test_toggles_off() {
        let (_, reply) = run(filter(false, false), &["Yes, ", "indeed.\nUser: ok"]);
        assert_eq!(reply, "Yes, indeed.\nUser: ok");
    }

    #[test]
    fn test_noise_only_output_is_empty() {
        let (forwarded, reply) = run(filter(true, true), &[",", ", ,\n"]);
        assert!(forwarded.is_empty());
        assert!(reply.is_empty());
    }
}
