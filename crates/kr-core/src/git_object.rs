//! Parser for the plaintext body git hands to its signing program.
//!
//! Commit objects start with a `tree` line, tag objects with an `object` line.
//! Header lines are split on whitespace into a tag and a value (tokens rejoined
//! with single spaces). The message is everything after the last header line
//! and is kept byte for byte because the signature covers those exact bytes.

use crate::protocol::{CommitInfo, GitObject, TagInfo};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected end of input while reading {0} line")]
    UnexpectedEof(&'static str),
    #[error("no tokens on {0} line")]
    NoTokens(&'static str),
    #[error("{0} line is not valid utf-8")]
    InvalidUtf8(&'static str),
    #[error("unrecognized object tag: {0}")]
    UnrecognizedObject(String),
    #[error("unexpected tag: {found} (expected {expected})")]
    UnexpectedTag {
        expected: &'static str,
        found: String,
    },
}

pub fn parse_git_object(input: &[u8]) -> Result<GitObject, ParseError> {
    let mut lines = HeaderLines::new(input);
    let (tag, value) = lines.next_line("first")?;
    match tag {
        "tree" => parse_commit(value, lines).map(GitObject::Commit),
        "object" => parse_tag(value, lines).map(GitObject::Tag),
        other => Err(ParseError::UnrecognizedObject(other.to_string())),
    }
}

fn parse_commit(tree: String, mut lines: HeaderLines<'_>) -> Result<CommitInfo, ParseError> {
    let mut parent: Option<String> = None;
    let mut merge_parents: Option<Vec<String>> = None;

    let author = loop {
        let (tag, value) = lines.next_line("commit header")?;
        match tag {
            "parent" if parent.is_none() => parent = Some(value),
            "parent" => merge_parents.get_or_insert_with(Vec::new).push(value),
            "author" => break value,
            other => {
                return Err(ParseError::UnexpectedTag {
                    expected: "parent or author",
                    found: other.to_string(),
                })
            }
        }
    };
    let committer = lines.expect_line("committer")?;

    Ok(CommitInfo {
        tree,
        parent,
        merge_parents,
        author,
        committer,
        message: lines.remainder().to_vec(),
    })
}

fn parse_tag(object: String, mut lines: HeaderLines<'_>) -> Result<TagInfo, ParseError> {
    let object_type = lines.expect_line("type")?;
    let tag = lines.expect_line("tag")?;
    let tagger = lines.expect_line("tagger")?;

    Ok(TagInfo {
        object,
        object_type,
        tag,
        tagger,
        message: lines.remainder().to_vec(),
    })
}

struct HeaderLines<'a> {
    rest: &'a [u8],
}

impl<'a> HeaderLines<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { rest: input }
    }

    /// Reads one newline-terminated line. A final line without `\n` is an error.
    fn next_line(&mut self, context: &'static str) -> Result<(&'a str, String), ParseError> {
        let newline = self
            .rest
            .iter()
            .position(|byte| *byte == b'\n')
            .ok_or(ParseError::UnexpectedEof(context))?;
        let (line, rest) = self.rest.split_at(newline + 1);
        self.rest = rest;

        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8(context))?;
        let mut tokens = line.split_whitespace();
        let tag = tokens.next().ok_or(ParseError::NoTokens(context))?;
        Ok((tag, tokens.collect::<Vec<_>>().join(" ")))
    }

    fn expect_line(&mut self, expected: &'static str) -> Result<String, ParseError> {
        let (tag, value) = self.next_line(expected)?;
        if tag != expected {
            return Err(ParseError::UnexpectedTag {
                expected,
                found: tag.to_string(),
            });
        }
        Ok(value)
    }

    fn remainder(self) -> &'a [u8] {
        self.rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_text(parents: &[&str], message: &str) -> Vec<u8> {
        let mut text = String::from("tree abc123\n");
        for parent in parents {
            text.push_str(&format!("parent {parent}\n"));
        }
        text.push_str("author A <a@x> 1500000000 +0000\n");
        text.push_str("committer B <b@x> 1500000000 +0000\n");
        text.push_str(message);
        text.into_bytes()
    }

    fn expect_commit(input: &[u8]) -> CommitInfo {
        match parse_git_object(input).expect("parse commit") {
            GitObject::Commit(commit) => commit,
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn root_commit_has_no_parents() {
        let commit = expect_commit(&commit_text(&[], "\ninitial\n"));
        assert_eq!(commit.tree, "abc123");
        assert_eq!(commit.parent, None);
        assert_eq!(commit.merge_parents, None);
        assert_eq!(commit.author, "A <a@x> 1500000000 +0000");
        assert_eq!(commit.committer, "B <b@x> 1500000000 +0000");
        assert_eq!(commit.message, b"\ninitial\n");
    }

    #[test]
    fn single_parent_is_first_parent() {
        let commit = expect_commit(&commit_text(&["def456"], "msg\n"));
        assert_eq!(commit.parent.as_deref(), Some("def456"));
        assert_eq!(commit.merge_parents, None);
        assert_eq!(commit.message, b"msg\n");
    }

    #[test]
    fn extra_parents_collect_in_order() {
        let commit = expect_commit(&commit_text(&["p1", "p2", "p3", "p4"], "\nmerge\n"));
        assert_eq!(commit.parent.as_deref(), Some("p1"));
        assert_eq!(
            commit.merge_parents,
            Some(vec!["p2".to_string(), "p3".to_string(), "p4".to_string()])
        );
    }

    #[test]
    fn message_bytes_are_preserved_exactly() {
        let message = "\nsubject  with  spaces \r\n\n\tbody\n\n  trailing   \n\n";
        let commit = expect_commit(&commit_text(&["def456"], message));
        assert_eq!(commit.message, message.as_bytes());

        let no_newline = expect_commit(&commit_text(&[], "\nno trailing newline"));
        assert_eq!(no_newline.message, b"\nno trailing newline");

        let mut binary = commit_text(&[], "\n");
        binary.extend_from_slice(&[0xff, 0x00, 0xfe, b'\n']);
        let commit = expect_commit(&binary);
        assert_eq!(commit.message, b"\n\xff\x00\xfe\n");
    }

    #[test]
    fn unknown_header_before_author_is_rejected() {
        let input = b"tree abc\nencoding latin1\nauthor A\ncommitter B\n\nmsg\n";
        assert_eq!(
            parse_git_object(input),
            Err(ParseError::UnexpectedTag {
                expected: "parent or author",
                found: "encoding".to_string(),
            })
        );
    }

    #[test]
    fn commit_requires_committer_after_author() {
        let input = b"tree abc\nauthor A\nparent def\n\nmsg\n";
        assert!(matches!(
            parse_git_object(input),
            Err(ParseError::UnexpectedTag {
                expected: "committer",
                ..
            })
        ));
    }

    #[test]
    fn commit_without_author_fails() {
        let input = b"tree abc\nparent def\n\nmsg\n";
        assert_eq!(
            parse_git_object(input),
            Err(ParseError::NoTokens("commit header"))
        );

        let truncated = b"tree abc\nparent def\n";
        assert_eq!(
            parse_git_object(truncated),
            Err(ParseError::UnexpectedEof("commit header"))
        );
    }

    #[test]
    fn tag_fields_reassemble_to_original_input() {
        let input = b"object abc123\ntype commit\ntag v1.0.0\ntagger T <t@x> 1500000000 +0000\n\nrelease notes\n\n";
        let tag = match parse_git_object(input).expect("parse tag") {
            GitObject::Tag(tag) => tag,
            other => panic!("expected tag, got {other:?}"),
        };
        assert_eq!(tag.object, "abc123");
        assert_eq!(tag.object_type, "commit");
        assert_eq!(tag.tag, "v1.0.0");
        assert_eq!(tag.tagger, "T <t@x> 1500000000 +0000");

        let mut rebuilt = format!(
            "object {}\ntype {}\ntag {}\ntagger {}\n",
            tag.object, tag.object_type, tag.tag, tag.tagger
        )
        .into_bytes();
        rebuilt.extend_from_slice(&tag.message);
        assert_eq!(rebuilt, input);
    }

    #[test]
    fn tag_missing_tagger_fails() {
        let input = b"object abc123\ntype commit\ntag v1.0.0\n\nrelease\n";
        assert_eq!(parse_git_object(input), Err(ParseError::NoTokens("tagger")));
    }

    #[test]
    fn tag_fields_out_of_order_fail() {
        let input = b"object abc123\ntag v1.0.0\ntype commit\ntagger T\n\nmsg\n";
        assert_eq!(
            parse_git_object(input),
            Err(ParseError::UnexpectedTag {
                expected: "type",
                found: "tag".to_string(),
            })
        );
    }

    #[test]
    fn unknown_leading_token_fails() {
        assert_eq!(
            parse_git_object(b"blob abc\n\ndata\n"),
            Err(ParseError::UnrecognizedObject("blob".to_string()))
        );
    }

    #[test]
    fn blank_or_empty_input_fails() {
        assert_eq!(parse_git_object(b"\n"), Err(ParseError::NoTokens("first")));
        assert_eq!(parse_git_object(b"   \t\n"), Err(ParseError::NoTokens("first")));
        assert_eq!(parse_git_object(b""), Err(ParseError::UnexpectedEof("first")));
    }
}
