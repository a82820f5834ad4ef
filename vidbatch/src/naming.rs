//! Output naming: sanitized stems and idempotency across naming-scheme drift.
//!
//! Output files have been named by several sanitizers over time. Each one is
//! kept as a [`NamingScheme`] value so that a file produced by an older
//! scheme is still recognised as already done.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};

/// Stem used when sanitizing leaves nothing behind.
pub const PLACEHOLDER_STEM: &str = "untitled";

static UNDERSCORE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore-run regex"));

/// Character replacements applied by the strict schemes.
const STRICT_TABLE: &[(char, &str)] = &[
    (' ', "_"),
    ('＂', ""),
    ('"', ""),
    ('\'', ""),
    ('´', ""),
    ('`', ""),
    ('<', ""),
    ('>', ""),
    ('?', ""),
    ('|', ""),
    ('\\', ""),
    ('/', ""),
    (':', ""),
    ('*', ""),
    ('%', ""),
    ('&', ""),
    ('^', ""),
    ('｜', ""),
    ('¦', ""),
    ('#', ""),
];

/// Punctuation/space handling step of a scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitution {
    /// Leave characters untouched.
    None,
    /// Replace everything that is not alphanumeric, `_` or `-` with `_`.
    NonWord,
    /// Replace listed characters; anything else is kept.
    Table(&'static [(char, &'static str)]),
}

impl Substitution {
    fn apply(&self, input: &str) -> String {
        match self {
            Substitution::None => input.to_string(),
            Substitution::NonWord => input
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() || c == '_' || c == '-' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect(),
            Substitution::Table(table) => {
                let mut out = String::with_capacity(input.len());
                for c in input.chars() {
                    match table.iter().find(|(from, _)| *from == c) {
                        Some((_, to)) => out.push_str(to),
                        None => out.push(c),
                    }
                }
                out
            }
        }
    }
}

/// A versioned, pure filename-stem sanitizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingScheme {
    pub name: &'static str,
    pub version: u32,
    /// Decompose accented characters, drop combining marks and any non-ASCII leftovers.
    pub fold_diacritics: bool,
    /// Apply the substitution before folding instead of after.
    pub substitute_first: bool,
    pub substitution: Substitution,
    /// Collapse `_` runs and strip leading/trailing `_`.
    pub squeeze_underscores: bool,
    /// Maximum stem length in characters.
    pub max_len: Option<usize>,
}

impl NamingScheme {
    /// Stems used as-is.
    pub const VERBATIM: NamingScheme = NamingScheme {
        name: "verbatim",
        version: 0,
        fold_diacritics: false,
        substitute_first: false,
        substitution: Substitution::None,
        squeeze_underscores: false,
        max_len: None,
    };

    /// ASCII-folded, every non-word character replaced by `_`.
    pub const ASCII_WORD: NamingScheme = NamingScheme {
        name: "ascii-word",
        version: 1,
        fold_diacritics: true,
        substitute_first: false,
        substitution: Substitution::NonWord,
        squeeze_underscores: true,
        max_len: None,
    };

    /// Reserved characters removed and spaces to `_` before folding, capped at
    /// 200 chars. Characters whose decomposition holds a space (`´`, no-break
    /// space) end up as a literal space or vanish instead of becoming `_`.
    pub const STRICT_LEGACY: NamingScheme = NamingScheme {
        name: "strict-legacy",
        version: 2,
        fold_diacritics: true,
        substitute_first: true,
        substitution: Substitution::Table(STRICT_TABLE),
        squeeze_underscores: true,
        max_len: Some(200),
    };

    /// ASCII-folded, reserved characters removed, spaces to `_`, capped at 200 chars.
    pub const STRICT: NamingScheme = NamingScheme {
        name: "strict",
        version: 3,
        fold_diacritics: true,
        substitute_first: false,
        substitution: Substitution::Table(STRICT_TABLE),
        squeeze_underscores: true,
        max_len: Some(200),
    };

    /// Every known scheme, newest first. The first entry names new outputs.
    pub fn registry() -> Vec<NamingScheme> {
        vec![Self::STRICT, Self::STRICT_LEGACY, Self::ASCII_WORD, Self::VERBATIM]
    }

    /// Look a scheme up by name (e.g. from a CLI flag).
    pub fn parse_name(name: &str) -> Option<NamingScheme> {
        Self::registry().into_iter().find(|s| s.name == name)
    }

    /// Sanitize a raw filename stem. Never returns an empty string.
    pub fn canonicalize(&self, raw_stem: &str) -> String {
        let mut name = if self.substitute_first {
            self.fold(&self.substitution.apply(raw_stem))
        } else {
            self.substitution.apply(&self.fold(raw_stem))
        };

        if self.squeeze_underscores {
            name = UNDERSCORE_RUN_RE.replace_all(&name, "_").trim_matches('_').to_string();
        }

        if let Some(max) = self.max_len {
            if name.chars().count() > max {
                name = name.chars().take(max).collect();
            }
        }

        if name.is_empty() {
            PLACEHOLDER_STEM.to_string()
        } else {
            name
        }
    }

    fn fold(&self, input: &str) -> String {
        if self.fold_diacritics {
            fold_diacritics(input)
        } else {
            input.to_string()
        }
    }
}

fn fold_diacritics(input: &str) -> String {
    input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(char::is_ascii)
        .collect()
}

/// Maps input files to output paths and checks for prior outputs.
#[derive(Debug, Clone)]
pub struct NameResolver {
    schemes: Vec<NamingScheme>,
}

impl NameResolver {
    /// Build a resolver over an ordered scheme list; the first scheme is current.
    pub fn new(schemes: Vec<NamingScheme>) -> Result<Self> {
        if schemes.is_empty() {
            return Err(Error::InvalidOption(
                "at least one naming scheme is required".into(),
            ));
        }
        Ok(Self { schemes })
    }

    /// The scheme used to name new outputs.
    pub fn current(&self) -> &NamingScheme {
        &self.schemes[0]
    }

    /// Output path for `input` under the current scheme.
    pub fn resolve_output_path(&self, input: &Path, output_dir: &Path, suffix: &str) -> PathBuf {
        output_path_for(input, output_dir, suffix, self.current())
    }

    /// First existing output for `input` under any registered scheme and any
    /// of `suffixes`, tried scheme by scheme in registry order.
    pub fn existing_output<S>(&self, input: &Path, output_dir: &Path, suffixes: &[S]) -> Option<PathBuf>
    where
        S: AsRef<str>,
    {
        self.schemes
            .iter()
            .flat_map(|scheme| {
                suffixes
                    .iter()
                    .map(move |suffix| output_path_for(input, output_dir, suffix.as_ref(), scheme))
            })
            .filter(|candidate| candidate != input)
            .find(|candidate| candidate.exists())
    }

    /// Whether any registered scheme already produced an output for `input`.
    pub fn already_satisfied<S>(&self, input: &Path, output_dir: &Path, suffixes: &[S]) -> bool
    where
        S: AsRef<str>,
    {
        self.existing_output(input, output_dir, suffixes).is_some()
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self {
            schemes: NamingScheme::registry(),
        }
    }
}

fn output_path_for(input: &Path, output_dir: &Path, suffix: &str, scheme: &NamingScheme) -> PathBuf {
    let raw_stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = scheme.canonicalize(&raw_stem);

    let file_name = match input.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    output_dir.join(file_name)
}
