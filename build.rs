use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are policed.
const SOURCE_DIRS: &[&str] = &["score", "cli", "tests"];

// A source policy: a line regex plus a predicate that can still excuse a matched line.
struct Rule {
    description: &'static str,
    pattern: &'static str,
    advice: &'static str,
    excused: fn(&str) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        description: "underscore-prefixed identifiers",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        advice: "Either use the binding (removing the underscore) or remove it completely.",
        excused: in_comment_or_string,
    },
    Rule {
        description: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        advice: "Either use the code (removing the attribute) or remove it completely.",
        excused: never,
    },
    Rule {
        description: "comments announcing edits",
        pattern: r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        advice: "Describe what the code does, not how it came to be.",
        excused: never,
    },
    Rule {
        description: "'**' in regular comments",
        pattern: r"(//|/\*).*\*\*",
        advice: "Emphasis is only allowed in doc comments.",
        excused: is_doc_comment,
    },
    Rule {
        description: "comments written entirely in capitals",
        pattern: r"(//|/\*|///).*",
        advice: "Write the comment in sentence case or delete it.",
        excused: not_all_caps_comment,
    },
];

fn never(_: &str) -> bool {
    false
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

fn in_comment_or_string(line: &str) -> bool {
    if line.trim_start().starts_with("//") {
        return true;
    }
    // Odd-numbered segments between double quotes are string contents.
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn not_all_caps_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    let comment = if let Some(rest) = trimmed.strip_prefix("///") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        rest
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end])
    } else {
        return true;
    };
    let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_none() || !letters.all(char::is_uppercase)
}

struct LineCollector<'r> {
    rule: &'r Rule,
    violations: Vec<String>,
}

impl Sink for LineCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if !(self.rule.excused)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn source_files() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check_sources() -> Result<(), Box<dyn Error>> {
    let files = source_files();
    let mut searcher = Searcher::new();
    for rule in RULES {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
        for path in &files {
            let mut collector = LineCollector {
                rule,
                violations: Vec::new(),
            };
            searcher.search_path(&matcher, path, &mut collector)?;
            if !collector.violations.is_empty() {
                let mut message = format!(
                    "\n❌ ERROR: Found {} {} in {}:\n",
                    collector.violations.len(),
                    rule.description,
                    path.display()
                );
                for violation in &collector.violations {
                    message.push_str(&format!("   {violation}\n"));
                }
                message.push_str(&format!("\n⚠️ {}\n", rule.advice));
                return Err(message.into());
            }
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = check_sources() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
