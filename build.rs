use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are policed. Anything else under the root
// (target output, vendored reference material) is ignored.
const SOURCE_ROOTS: [&str; 4] = ["pipeline", "models", "src", "tests"];

// Collects every matching line for one rule in one file.
struct RuleViolations {
    rule: &'static str,
    advice: &'static str,
    file_path: PathBuf,
    lines: Vec<String>,
    skip_comments_and_strings: bool,
}

impl RuleViolations {
    fn new(rule: &'static str, advice: &'static str, file_path: &Path) -> Self {
        Self {
            rule,
            advice,
            file_path: file_path.to_path_buf(),
            lines: Vec::new(),
            skip_comments_and_strings: false,
        }
    }

    fn skipping_comments_and_strings(mut self) -> Self {
        self.skip_comments_and_strings = true;
        self
    }

    fn into_error_message(self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }

        let mut message = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.lines.len(),
            self.rule,
            self.file_path.display()
        );
        for line in &self.lines {
            message.push_str(&format!("   {line}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.advice));
        Some(message)
    }
}

impl Sink for RuleViolations {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.skip_comments_and_strings {
            let trimmed = line_text.trim_start();
            if trimmed.starts_with("//") {
                return Ok(true);
            }
            let inside_string = line_text
                .split('"')
                .enumerate()
                .any(|(i, part)| i % 2 == 1 && part.contains('_'));
            if inside_string {
                return Ok(true);
            }
        }

        self.lines.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

// Rejects comments whose alphabetic characters are all uppercase.
struct ShoutingComments {
    file_path: PathBuf,
    lines: Vec<String>,
}

impl Sink for ShoutingComments {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        let trimmed = line_text.trim_start();

        let comment_text = if let Some(rest) = trimmed.strip_prefix("///") {
            rest.trim()
        } else if let Some(rest) = trimmed.strip_prefix("//") {
            rest.trim()
        } else {
            return Ok(true);
        };

        let letters: Vec<char> = comment_text.chars().filter(|c| c.is_alphabetic()).collect();
        if !letters.is_empty() && letters.iter().all(|c| c.is_uppercase()) {
            self.lines.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    if let Err(e) = enforce_source_rules() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_ROOTS.into_iter().flat_map(|root| {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn enforce_source_rules() -> Result<(), Box<dyn Error>> {
    let underscore = RegexMatcher::new_line_matcher(r"\b(_[a-zA-Z0-9_]+)\b")?;
    let dead_code = RegexMatcher::new_line_matcher(r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]")?;
    let markers = RegexMatcher::new_line_matcher(
        r"(//|/\*).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFY|UPDATED|UPDATE)",
    )?;
    let any_comment = RegexMatcher::new_line_matcher(r"//.*")?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        let mut underscore_hits = RuleViolations::new(
            "underscore-prefixed bindings",
            "Underscore-prefixed names are not allowed. Use the binding or remove it.",
            &path,
        )
        .skipping_comments_and_strings();
        searcher.search_path(&underscore, &path, &mut underscore_hits)?;
        if let Some(message) = underscore_hits.into_error_message() {
            return Err(message.into());
        }

        let mut dead_code_hits = RuleViolations::new(
            "dead-code allowances",
            "Dead code is removed, never silenced.",
            &path,
        );
        searcher.search_path(&dead_code, &path, &mut dead_code_hits)?;
        if let Some(message) = dead_code_hits.into_error_message() {
            return Err(message.into());
        }

        let mut marker_hits = RuleViolations::new(
            "revision-marker comments",
            "Comments describe the code as it is, not its edit history.",
            &path,
        );
        searcher.search_path(&markers, &path, &mut marker_hits)?;
        if let Some(message) = marker_hits.into_error_message() {
            return Err(message.into());
        }

        let mut shouting = ShoutingComments {
            file_path: path.clone(),
            lines: Vec::new(),
        };
        searcher.search_path(&any_comment, &path, &mut shouting)?;
        if !shouting.lines.is_empty() {
            return Err(format!(
                "\n❌ ERROR: Found {} all-uppercase comments in {}:\n   {}\n",
                shouting.lines.len(),
                shouting.file_path.display(),
                shouting.lines.join("\n   ")
            )
            .into());
        }
    }

    Ok(())
}
