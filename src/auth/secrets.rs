//! Secrets file scanning
//!
//! Entries have the form `client server secret [addr ...] [-- option ...]`
//! and are matched against a (client, server) pair. `*` matches anything;
//! an entry naming the client or server explicitly beats a wildcard one.
//! Files are parsed on every lookup and nothing is cached.

use crate::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Longest word kept by the tokenizer, longer words are truncated
pub const MAX_WORD_LEN: usize = 1024;

/// Longest secret, longer secrets are truncated
pub const MAX_SECRET_LEN: usize = 256;

/// The entry named the client explicitly
pub const NONWILD_CLIENT: u8 = 0x1;

/// The entry named the server explicitly
pub const NONWILD_SERVER: u8 = 0x2;

/// Secret that defers PAP checks to the system login database
pub const LOGIN_SECRET: &str = "@login";

/// Which secrets file to consult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Pap,
    Chap,
}

/// Best matching line of a secrets file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    pub client: String,
    pub server: String,
    pub secret: Zeroizing<Vec<u8>>,
    /// Address authorization words
    pub addrs: Vec<String>,
    /// Words following `--`
    pub options: Vec<String>,
    /// [`NONWILD_CLIENT`] | [`NONWILD_SERVER`]
    pub specificity: u8,
}

impl SecretEntry {
    pub fn is_login(&self) -> bool {
        self.secret.as_slice() == LOGIN_SECRET.as_bytes()
    }
}

/// Something that can answer secret lookups
pub trait SecretSource {
    /// Find the best entry for (client, server). `None` for either name
    /// matches any entry.
    fn lookup(
        &self,
        kind: SecretKind,
        client: Option<&str>,
        server: Option<&str>,
    ) -> Option<SecretEntry>;

    fn has_secret(&self, kind: SecretKind, client: Option<&str>, server: Option<&str>) -> bool {
        self.lookup(kind, client, server).is_some()
    }
}

/// Secrets read from `pap-secrets` / `chap-secrets` style files
#[derive(Debug, Clone, Default)]
pub struct SecretsFiles {
    pub pap: Option<PathBuf>,
    pub chap: Option<PathBuf>,
}

impl SecretsFiles {
    pub fn new(pap: Option<PathBuf>, chap: Option<PathBuf>) -> Self {
        Self { pap, chap }
    }

    fn path(&self, kind: SecretKind) -> Option<&Path> {
        match kind {
            SecretKind::Pap => self.pap.as_deref(),
            SecretKind::Chap => self.chap.as_deref(),
        }
    }
}

impl SecretSource for SecretsFiles {
    fn lookup(
        &self,
        kind: SecretKind,
        client: Option<&str>,
        server: Option<&str>,
    ) -> Option<SecretEntry> {
        let path = self.path(kind)?;
        match scan_file(path, client, server) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "can't read secrets file");
                None
            }
        }
    }
}

/// Secrets held as text, parsed on every lookup
#[derive(Debug, Clone, Default)]
pub struct InlineSecrets {
    pap: Zeroizing<String>,
    chap: Zeroizing<String>,
}

impl InlineSecrets {
    pub fn new(pap: impl Into<String>, chap: impl Into<String>) -> Self {
        Self {
            pap: Zeroizing::new(pap.into()),
            chap: Zeroizing::new(chap.into()),
        }
    }
}

impl SecretSource for InlineSecrets {
    fn lookup(
        &self,
        kind: SecretKind,
        client: Option<&str>,
        server: Option<&str>,
    ) -> Option<SecretEntry> {
        let text = match kind {
            SecretKind::Pap => &self.pap,
            SecretKind::Chap => &self.chap,
        };
        scan_secrets(text.as_bytes(), client, server, None).unwrap_or_else(|e| {
            warn!(error = %e, "bad inline secrets");
            None
        })
    }
}

/// Scan a secrets file on disk
pub fn scan_file(
    path: &Path,
    client: Option<&str>,
    server: Option<&str>,
) -> Result<Option<SecretEntry>> {
    let data = read_zeroizing(path)?;
    scan_secrets(&data, client, server, path.parent())
}

fn read_zeroizing(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let mut file = File::open(path).map_err(|e| Error::Secrets {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let mut data = Zeroizing::new(Vec::new());
    file.read_to_end(&mut data)?;
    Ok(data)
}

fn is_wild(word: &[u8]) -> bool {
    word == b"*"
}

/// Scan secrets text for the best entry matching (client, server).
///
/// A later entry replaces an earlier one only if it is strictly more
/// specific. `@file` secrets are read from the first word of that file,
/// relative paths resolving against `base`.
pub fn scan_secrets(
    data: &[u8],
    client: Option<&str>,
    server: Option<&str>,
    base: Option<&Path>,
) -> Result<Option<SecretEntry>> {
    let mut words = Tokenizer::new(data);
    let mut best: Option<SecretEntry> = None;

    // The first word always starts a line
    let Some(mut word) = words.next_word() else {
        return Ok(None);
    };
    let mut newline = true;

    loop {
        // Skip to the first word of a line
        while !newline {
            match words.next_word() {
                Some(next) => {
                    newline = next.newline;
                    word = next;
                }
                None => break,
            }
        }
        if !newline {
            break;
        }

        // Client
        let mut flags = 0;
        if !is_wild(&word.text) {
            if client.is_some_and(|c| c.as_bytes() != word.text.as_slice()) {
                newline = false;
                continue;
            }
            flags = NONWILD_CLIENT;
        }
        let client_word = lossy(&word.text);

        // Server
        let Some(server_word) = words.next_word() else {
            break;
        };
        newline = server_word.newline;
        if newline {
            word = server_word;
            continue;
        }
        if !is_wild(&server_word.text) {
            if server.is_some_and(|s| s.as_bytes() != server_word.text.as_slice()) {
                continue;
            }
            flags |= NONWILD_SERVER;
        }

        let best_flags = best.as_ref().map(|b| i16::from(b.specificity)).unwrap_or(-1);
        if i16::from(flags) <= best_flags {
            continue;
        }

        // Secret
        let Some(secret_word) = words.next_word() else {
            break;
        };
        newline = secret_word.newline;
        if newline {
            word = secret_word;
            continue;
        }
        let secret = match indirect_secret(&secret_word.text, base) {
            Some(Ok(secret)) => secret,
            Some(Err(e)) => {
                warn!(error = %e, "can't read indirect secret file");
                continue;
            }
            None => secret_word.text.clone(),
        };

        // Address words run to the end of the line
        let mut addrs = Vec::new();
        let mut at_eof = true;
        while let Some(next) = words.next_word() {
            newline = next.newline;
            if newline {
                word = next;
                at_eof = false;
                break;
            }
            addrs.push(lossy(&next.text));
        }

        let options = match addrs.iter().position(|w| w == "--") {
            Some(split) => {
                let options = addrs.split_off(split + 1);
                addrs.truncate(split);
                options
            }
            None => Vec::new(),
        };

        let mut secret = secret;
        secret.truncate(MAX_SECRET_LEN);
        debug!(client = %client_word, specificity = flags, "secrets entry matched");
        best = Some(SecretEntry {
            client: client_word,
            server: lossy(&server_word.text),
            secret,
            addrs,
            options,
            specificity: flags,
        });

        if at_eof {
            break;
        }
    }

    Ok(best)
}

/// `@path` secrets name a file whose first word is the secret
fn indirect_secret(
    word: &[u8],
    base: Option<&Path>,
) -> Option<Result<Zeroizing<Vec<u8>>>> {
    let path = word.strip_prefix(b"@")?;
    if word == LOGIN_SECRET.as_bytes() || path.is_empty() {
        return None;
    }
    let path = PathBuf::from(String::from_utf8_lossy(path).into_owned());
    let path = match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    };

    Some(read_zeroizing(&path).and_then(|data| {
        let mut words = Tokenizer::new(&data);
        match words.next_word() {
            Some(word) => Ok(word.text),
            None => Err(Error::Secrets {
                path: path.display().to_string(),
                message: "no secret in indirect secret file".into(),
            }),
        }
    }))
}

fn lossy(word: &[u8]) -> String {
    String::from_utf8_lossy(word).into_owned()
}

/// One word and whether a newline preceded it
#[derive(Debug)]
pub struct Word {
    pub text: Zeroizing<Vec<u8>>,
    pub newline: bool,
}

/// Splits secrets text into words.
///
/// Whitespace separates words and `#` starts a comment running to the end
/// of the line. Single or double quotes group characters, and backslash
/// escapes `\a \b \f \n \r \s \t`, octal `\ddd`, hex `\xHH`, or any other
/// character. Backslash-newline joins lines.
pub struct Tokenizer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn getc(&mut self) -> Option<u8> {
        let c = self.data.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn ungetc(&mut self) {
        self.pos -= 1;
    }

    fn push(word: &mut Vec<u8>, len: &mut usize, c: u8) {
        if *len < MAX_WORD_LEN {
            word.push(c);
        }
        *len += 1;
    }

    /// Next word, or `None` at end of input
    pub fn next_word(&mut self) -> Option<Word> {
        let mut newline = false;
        let mut escape = false;
        let mut comment = false;
        let mut c;

        // Skip whitespace and comments
        loop {
            c = self.getc();
            let Some(ch) = c else { break };
            if ch == b'\n' {
                if escape {
                    escape = false;
                } else {
                    newline = true;
                    comment = false;
                }
                continue;
            }
            if comment {
                continue;
            }
            if escape {
                break;
            }
            if ch == b'\\' {
                escape = true;
                continue;
            }
            if ch == b'#' {
                comment = true;
                continue;
            }
            if !ch.is_ascii_whitespace() {
                break;
            }
        }

        let mut word = Zeroizing::new(Vec::new());
        let mut len = 0;
        let mut quote: Option<u8> = None;

        while let Some(ch) = c {
            if escape {
                escape = false;
                if ch == b'\n' {
                    c = self.getc();
                    continue;
                }
                let value = match ch {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b's' => b' ',
                    b't' => b'\t',
                    b'0'..=b'7' => {
                        let mut value: u32 = 0;
                        let mut digit = Some(ch);
                        for _ in 0..3 {
                            match digit {
                                Some(d @ b'0'..=b'7') => {
                                    value = (value << 3) + u32::from(d - b'0');
                                    digit = self.getc();
                                }
                                _ => break,
                            }
                        }
                        Self::push(&mut word, &mut len, value as u8);
                        c = digit;
                        continue;
                    }
                    b'x' => {
                        let mut value: u32 = 0;
                        let mut digit = self.getc();
                        for _ in 0..2 {
                            match digit.and_then(|d| char::from(d).to_digit(16)) {
                                Some(v) => {
                                    value = (value << 4) + v;
                                    digit = self.getc();
                                }
                                None => break,
                            }
                        }
                        Self::push(&mut word, &mut len, value as u8);
                        c = digit;
                        continue;
                    }
                    other => other,
                };
                Self::push(&mut word, &mut len, value);
                c = self.getc();
                continue;
            }

            if ch == b'\\' {
                escape = true;
                c = self.getc();
                continue;
            }

            match quote {
                Some(q) if ch == q => {
                    quote = None;
                    c = self.getc();
                    continue;
                }
                Some(_) => {}
                None if ch == b'"' || ch == b'\'' => {
                    quote = Some(ch);
                    c = self.getc();
                    continue;
                }
                None if ch.is_ascii_whitespace() || ch == b'#' => {
                    self.ungetc();
                    break;
                }
                None => {}
            }

            Self::push(&mut word, &mut len, ch);
            c = self.getc();
        }

        if c.is_none() {
            if len == 0 {
                return None;
            }
            if quote.is_some() {
                warn!("quoted word runs to end of file");
            }
        }
        if len > MAX_WORD_LEN {
            warn!(len, "word in secrets file too long, truncated");
        }

        Some(Word {
            text: word,
            newline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn words(text: &str) -> Vec<(String, bool)> {
        let mut tokenizer = Tokenizer::new(text.as_bytes());
        let mut out = Vec::new();
        while let Some(word) = tokenizer.next_word() {
            out.push((lossy(&word.text), word.newline));
        }
        out
    }

    fn scan(text: &str, client: Option<&str>, server: Option<&str>) -> Option<SecretEntry> {
        scan_secrets(text.as_bytes(), client, server, None).unwrap()
    }

    #[test]
    fn test_tokenizer_words_and_newlines() {
        assert_eq!(
            words("bob  server\tpass\n# comment line\nalice * \"two words\""),
            vec![
                ("bob".into(), false),
                ("server".into(), false),
                ("pass".into(), false),
                ("alice".into(), true),
                ("*".into(), false),
                ("two words".into(), false),
            ]
        );
    }

    #[test]
    fn test_tokenizer_escapes() {
        assert_eq!(words(r"a\sb")[0].0, "a b");
        assert_eq!(words(r"\101\x42c")[0].0, "ABc");
        assert_eq!(words("one\\\ntwo")[0].0, "onetwo");
        assert_eq!(words(r"'it''s'")[0].0, "its");
        assert_eq!(words(r#""a#b" c"#).len(), 2);
    }

    #[test]
    fn test_tokenizer_comment_ends_word() {
        assert_eq!(words("abc#def\nghi"), vec![("abc".into(), false), ("ghi".into(), true)]);
    }

    #[test]
    fn test_tokenizer_truncates_long_words() {
        let long = "x".repeat(MAX_WORD_LEN + 50);
        let result = words(&long);
        assert_eq!(result[0].0.len(), MAX_WORD_LEN);
    }

    #[test]
    fn test_exact_match() {
        let entry = scan("bob server right\nalice server other\n", Some("bob"), Some("server"))
            .unwrap();
        assert_eq!(entry.secret.as_slice(), b"right");
        assert_eq!(entry.specificity, NONWILD_CLIENT | NONWILD_SERVER);
    }

    #[test]
    fn test_specific_entry_beats_wildcard() {
        let text = "* * anything\nbob * bobs\n* server servers\n";
        let entry = scan(text, Some("bob"), Some("server")).unwrap();
        // NONWILD_SERVER (2) outranks NONWILD_CLIENT (1)
        assert_eq!(entry.secret.as_slice(), b"servers");

        let entry = scan(text, Some("bob"), Some("other")).unwrap();
        assert_eq!(entry.secret.as_slice(), b"bobs");
    }

    #[test]
    fn test_equal_specificity_keeps_first() {
        let text = "bob server first\nbob server second\n";
        let entry = scan(text, Some("bob"), Some("server")).unwrap();
        assert_eq!(entry.secret.as_slice(), b"first");
    }

    #[test]
    fn test_no_match() {
        assert!(scan("bob server pw\n", Some("alice"), Some("server")).is_none());
        assert!(scan("", Some("bob"), None).is_none());
        assert!(scan("# only a comment\n", Some("bob"), None).is_none());
    }

    #[test]
    fn test_any_client() {
        let entry = scan("bob server pw\n", None, Some("server")).unwrap();
        assert_eq!(entry.client, "bob");
    }

    #[test]
    fn test_addresses_and_options() {
        let text = "bob * pw 10.0.0.2 10.0.1.0/24 -- idle 30\nalice * x\n";
        let entry = scan(text, Some("bob"), Some("srv")).unwrap();
        assert_eq!(entry.addrs, vec!["10.0.0.2", "10.0.1.0/24"]);
        assert_eq!(entry.options, vec!["idle", "30"]);
    }

    #[test]
    fn test_short_line_skipped() {
        let text = "bob\nbob server pw\n";
        let entry = scan(text, Some("bob"), Some("server")).unwrap();
        assert_eq!(entry.secret.as_slice(), b"pw");
    }

    #[test]
    fn test_secret_capped() {
        let text = format!("bob * {}\n", "s".repeat(400));
        let entry = scan(&text, Some("bob"), None).unwrap();
        assert_eq!(entry.secret.len(), MAX_SECRET_LEN);
    }

    #[test]
    fn test_login_secret_not_indirect() {
        let entry = scan("bob * @login\n", Some("bob"), None).unwrap();
        assert!(entry.is_login());
    }

    #[test]
    fn test_indirect_secret_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut secret = std::fs::File::create(dir.path().join("bob.secret")).unwrap();
        writeln!(secret, "hidden  trailing").unwrap();

        let text = "bob * @bob.secret\n";
        let entry = scan_secrets(text.as_bytes(), Some("bob"), None, Some(dir.path()))
            .unwrap()
            .unwrap();
        assert_eq!(entry.secret.as_slice(), b"hidden");

        // Unreadable indirect file: the entry is skipped
        let text = "bob * @missing\n";
        let entry = scan_secrets(text.as_bytes(), Some("bob"), None, Some(dir.path())).unwrap();
        assert!(entry.is_none());
    }

    #[test]
    fn test_secrets_files_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# client server secret").unwrap();
        writeln!(file, "bob gateway s3cr3t 192.0.2.10").unwrap();

        let files = SecretsFiles::new(None, Some(file.path().to_path_buf()));
        let entry = files
            .lookup(SecretKind::Chap, Some("bob"), Some("gateway"))
            .unwrap();
        assert_eq!(entry.secret.as_slice(), b"s3cr3t");
        assert_eq!(entry.addrs, vec!["192.0.2.10"]);
        assert!(!files.has_secret(SecretKind::Pap, Some("bob"), None));
    }

    #[test]
    fn test_missing_file_denies() {
        let files = SecretsFiles::new(Some(PathBuf::from("/nonexistent/pap-secrets")), None);
        assert!(files.lookup(SecretKind::Pap, Some("bob"), None).is_none());
    }
}
