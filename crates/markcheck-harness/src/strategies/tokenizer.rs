use std::fmt::Write as _;
use std::path::Path;

use markcheck_core::diag::IgnoreDiagnostics;
use markcheck_core::{Attribute, ContentHandler, PushParser};

use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

/// Longest start tag name a fixture header may carry.
const MAX_START_TAG: usize = 30;

/// One record of a tokenizer fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerTest {
    pub number: u32,
    pub start_tag: String,
    pub data_state: u32,
    pub data: Vec<u8>,
}

/// Parse fixture records: a `number startTag dataState byteCount` header
/// line followed by exactly `byteCount` bytes of input.
pub fn parse_fixture(path: &Path, bytes: &[u8]) -> Result<Vec<TokenizerTest>, CaseError> {
    let malformed = |pos: usize, message: String| CaseError::Fixture {
        path: path.to_path_buf(),
        line: 1 + bytes[..pos].iter().filter(|&&b| b == b'\n').count(),
        message,
    };

    let mut tests = Vec::new();
    let mut pos = 0;
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos == bytes.len() {
            break;
        }
        let header_end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |n| pos + n);
        let header = String::from_utf8_lossy(&bytes[pos..header_end]);
        let fields: Vec<&str> = header.split_ascii_whitespace().collect();
        let [number, start_tag, data_state, count] = fields.as_slice() else {
            return Err(malformed(pos, format!("expected 4 header fields, found {}", fields.len())));
        };
        let number: u32 = number
            .parse()
            .map_err(|_| malformed(pos, format!("bad test number {number:?}")))?;
        let data_state: u32 = data_state
            .parse()
            .map_err(|_| malformed(pos, format!("bad data state {data_state:?}")))?;
        let count: usize = count
            .parse()
            .map_err(|_| malformed(pos, format!("bad byte count {count:?}")))?;
        let start_tag: String = start_tag.chars().take(MAX_START_TAG).collect();

        let data_start = (header_end + 1).min(bytes.len());
        let Some(data_end) = data_start.checked_add(count).filter(|&end| end <= bytes.len()) else {
            return Err(malformed(
                pos,
                format!("test {number} wants {count} bytes, {} left", bytes.len() - data_start),
            ));
        };
        tests.push(TokenizerTest {
            number,
            start_tag,
            data_state,
            data: bytes[data_start..data_end].to_vec(),
        });
        pos = data_end;
    }
    Ok(tests)
}

/// Run every fixture record through the HTML tokenizer and compare the
/// combined token listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenizerStrategy;

impl TestStrategy for TokenizerStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        _options: TestOptions,
    ) -> Result<(), CaseError> {
        let bytes = files.read_input()?;
        let tests = parse_fixture(files.require_input()?, &bytes)?;
        let mut out = String::new();
        for (counter, test) in tests.iter().enumerate() {
            let _ = writeln!(out, "{counter}");
            let mut parser = PushParser::tokenizer(&test.start_tag, test.data_state);
            let mut tokens = TokenWriter {
                out: &mut out,
                pending_text: false,
            };
            parser.feed(&test.data, true, &mut tokens, &mut IgnoreDiagnostics);
            tokens.end_token_text();
        }
        ctx.check_result(files, out.as_bytes())
    }
}

struct TokenWriter<'a> {
    out: &'a mut String,
    pending_text: bool,
}

impl TokenWriter<'_> {
    fn end_token_text(&mut self) {
        if self.pending_text {
            self.out.push('\n');
            self.pending_text = false;
        }
    }
}

impl ContentHandler for TokenWriter<'_> {
    fn end_document(&mut self) {
        self.end_token_text();
    }

    fn internal_subset(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {
        self.end_token_text();
        let _ = write!(
            self.out,
            "DOCTYPE\n{name}\n{}\n{}\n",
            public_id.unwrap_or("<none>"),
            system_id.unwrap_or("<none>")
        );
    }

    fn start_element(&mut self, name: &str, attributes: &[Attribute], _implied: bool) {
        self.end_token_text();
        let _ = write!(self.out, "StartTag\n{name}");
        for attr in attributes {
            let _ = write!(self.out, " {}={}", attr.name, attr.value.as_deref().unwrap_or(""));
        }
        self.out.push('\n');
    }

    fn end_element(&mut self, name: &str) {
        self.end_token_text();
        let _ = write!(self.out, "EndTag\n{name}\n");
    }

    fn characters(&mut self, text: &str) {
        if !self.pending_text {
            self.out.push_str("Character\n");
            self.pending_text = true;
        }
        self.out.push_str(text);
    }

    fn reference(&mut self, name: &str) {
        self.characters(&format!("&{name};"));
    }

    fn comment(&mut self, text: &str, _in_subset: bool) {
        self.end_token_text();
        let _ = write!(self.out, "Comment\n{text}\n");
    }

    fn processing_instruction(&mut self, target: &str, data: &str) {
        self.end_token_text();
        if data.is_empty() {
            let _ = write!(self.out, "Comment\n?{target}\n");
        } else {
            let _ = write!(self.out, "Comment\n?{target} {data}\n");
        }
    }
}
